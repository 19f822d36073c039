//! Activation history tracking.
//!
//! One [`ActivationHistoryEntry`] is produced per activation of a state
//! machine and handed to an [`ActivationHistory`] that may be read from any
//! thread.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::active_states::join_distinct;
use crate::{RootContext, panic_message};

/// Uncaught failure recorded for an activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fault {
    message: String,
}

impl Fault {
    /// Creates a fault from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates a fault from a panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self::new(panic_message(payload))
    }

    /// Creates a fault from an error, including its source chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { message }
    }

    /// Human readable description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Record of a single activation.
///
/// Entries are immutable once created. Equality and hashing cover all four
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationHistoryEntry {
    start_state: String,
    events: String,
    end_state: Option<String>,
    fault: Option<Fault>,
}

impl ActivationHistoryEntry {
    /// Creates an entry from already rendered state and event sets.
    pub fn new(
        start_state: impl Into<String>,
        events: impl Into<String>,
        end_state: Option<String>,
        fault: Option<Fault>,
    ) -> Self {
        Self {
            start_state: start_state.into(),
            events: events.into(),
            end_state,
            fault,
        }
    }

    /// Runs one activation against `machine` and records what it did.
    ///
    /// A panic raised by `tick` is caught and stored as the fault; the end
    /// state is absent in that case.
    ///
    /// ```rust
    /// use fsm_runtime_core::{ActivationHistoryEntry, RootContext};
    ///
    /// struct Lamp(&'static str);
    ///
    /// impl RootContext for Lamp {
    ///     fn current_states(&self) -> Vec<String> {
    ///         vec![self.0.to_string()]
    ///     }
    /// }
    ///
    /// let mut lamp = Lamp("Off");
    /// let entry = ActivationHistoryEntry::capture(&mut lamp, ["switch"], |lamp| lamp.0 = "On");
    /// assert_eq!(entry.start_state(), "Off");
    /// assert_eq!(entry.end_state(), Some("On"));
    /// ```
    pub fn capture<M, I, S, F>(machine: &mut M, events: I, tick: F) -> Self
    where
        M: RootContext,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&mut M),
    {
        let start_state = join_distinct(machine.current_states());
        let events = join_distinct(events);

        match panic::catch_unwind(AssertUnwindSafe(|| tick(&mut *machine))) {
            Ok(()) => {
                let end_state = join_distinct(machine.current_states());
                Self::new(start_state, events, Some(end_state), None)
            }
            Err(payload) => {
                let fault = Fault::from_panic(payload.as_ref());
                tracing::error!(
                    start_state = %start_state,
                    events = %events,
                    error = %fault,
                    "state machine activation panicked"
                );
                Self::new(start_state, events, None, Some(fault))
            }
        }
    }

    /// States active at the start of the activation, comma separated.
    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    /// Events present during the activation, comma separated.
    pub fn events(&self) -> &str {
        &self.events
    }

    /// States active at the end of the activation, if it completed.
    pub fn end_state(&self) -> Option<&str> {
        self.end_state.as_deref()
    }

    /// Failure raised by the activation, if any.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }
}

impl fmt::Display for ActivationHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActivationHistoryEntry [start_state={}, events={}, end_state={}, fault={}]",
            self.start_state,
            self.events,
            self.end_state.as_deref().unwrap_or("None"),
            self.fault
                .as_ref()
                .map_or_else(|| "None".to_string(), ToString::to_string),
        )
    }
}

/// Bounded collector of the most recent activations.
///
/// When full, recording a new entry evicts the oldest one.
#[derive(Debug)]
pub struct ActivationHistory {
    capacity: usize,
    entries: parking_lot::Mutex<VecDeque<ActivationHistoryEntry>>,
}

impl ActivationHistory {
    /// Creates an empty history keeping at most `capacity` entries.
    ///
    /// A capacity of zero keeps nothing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, evicting the oldest one when full.
    pub fn record(&self, entry: ActivationHistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<ActivationHistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Most recently recorded entry.
    pub fn latest(&self) -> Option<ActivationHistoryEntry> {
        self.entries.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
