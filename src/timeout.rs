//! Wall-clock timeout manager running its action on an execution context.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fsm_runtime_core::{ExecutionError, Timeout, TimeoutAction, TimeoutManager, panic_message};
use parking_lot::Mutex;

use crate::context::{ExecutionContext, FaultReporter, ScheduledWork};

/// One armed timer. Replaced, never reused, on every start.
struct ArmedTimeout {
    label: Arc<str>,
    cancelled: AtomicBool,
    registered: AtomicBool,
    timer: Mutex<Option<ScheduledWork>>,
}

impl ArmedTimeout {
    fn new(label: Arc<str>) -> Self {
        Self {
            label,
            cancelled: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
    }
}

impl Timeout for ArmedTimeout {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct TimeoutState {
    /// Timer that has not fired yet, or whose callback is still queued.
    armed: Option<Arc<ArmedTimeout>>,
    /// Timeout whose action is executing right now.
    firing: Option<Arc<ArmedTimeout>>,
}

impl TimeoutState {
    fn disarm(&mut self, timeout: &Arc<ArmedTimeout>) -> bool {
        if self
            .armed
            .as_ref()
            .is_some_and(|armed| Arc::ptr_eq(armed, timeout))
        {
            self.armed = None;
            true
        } else {
            false
        }
    }

    fn cancel_all(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.cancel();
        }
        if let Some(firing) = &self.firing {
            firing.cancel();
        }
    }
}

/// Callback queued on the execution context when the timer elapses.
///
/// Dropping it without running (the context was released or shut down)
/// returns the manager to idle.
struct Firing {
    timeout: Arc<ArmedTimeout>,
    state: Weak<Mutex<TimeoutState>>,
    action: TimeoutAction,
    faults: FaultReporter,
    settled: bool,
}

impl Firing {
    fn run(mut self) {
        let Some(state) = self.state.upgrade() else {
            self.settled = true;
            return;
        };

        {
            let mut state = state.lock();
            self.settled = true;
            if self.timeout.is_cancelled() {
                tracing::trace!(timeout = %self.timeout.label, "skipping cancelled timeout");
                return;
            }
            state.disarm(&self.timeout);
            state.firing = Some(self.timeout.clone());
        }

        let timeout = self.timeout.as_ref();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.action)(timeout))) {
            self.faults.record();
            tracing::error!(
                context = %self.faults.context(),
                timeout = %self.timeout.label,
                error = %panic_message(payload.as_ref()),
                "timeout action panicked"
            );
        }

        let mut state = state.lock();
        if state
            .firing
            .as_ref()
            .is_some_and(|firing| Arc::ptr_eq(firing, &self.timeout))
        {
            state.firing = None;
        }
    }
}

impl Drop for Firing {
    fn drop(&mut self) {
        // Cancelled timeouts were already removed by whoever cancelled them.
        if self.settled
            || self.timeout.is_cancelled()
            || !self.timeout.registered.load(Ordering::SeqCst)
        {
            return;
        }
        if let Some(state) = self.state.upgrade()
            && state.lock().disarm(&self.timeout)
        {
            tracing::debug!(timeout = %self.timeout.label, "timeout dropped before it could run");
        }
    }
}

/// Timeout manager backed by a tokio timer on the bound context's worker.
///
/// Cancellation is race-free: the callback re-checks the cancellation flag
/// under the manager lock before invoking the action, so a timer that fired
/// just before [`TimeoutManager::cancel`] does nothing.
pub struct ScheduledTimeoutManager {
    label: Arc<str>,
    delay: Duration,
    context: ExecutionContext,
    action: TimeoutAction,
    state: Arc<Mutex<TimeoutState>>,
}

impl ScheduledTimeoutManager {
    /// Creates an idle manager. Use [`TimeoutManager::start`] to arm it.
    pub fn new(
        context: ExecutionContext,
        label: impl Into<String>,
        delay: Duration,
        action: TimeoutAction,
    ) -> Self {
        Self {
            label: Arc::from(label.into()),
            delay,
            context,
            action,
            state: Arc::new(Mutex::new(TimeoutState::default())),
        }
    }

    /// Configured delay; restarts always use the full value.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn firing(&self, timeout: Arc<ArmedTimeout>) -> Firing {
        Firing {
            timeout,
            state: Arc::downgrade(&self.state),
            action: self.action.clone(),
            faults: self.context.fault_reporter(),
            settled: false,
        }
    }

    fn arm(&self, state: &mut TimeoutState) -> Result<(), ExecutionError> {
        let timeout = Arc::new(ArmedTimeout::new(self.label.clone()));
        let firing = self.firing(timeout.clone());

        let timer = match self.context.schedule(self.delay, move || firing.run()) {
            Ok(timer) => timer,
            Err(err) => {
                tracing::warn!(timeout = %self.label, error = %err, "cannot arm timeout");
                return Err(err);
            }
        };
        *timeout.timer.lock() = Some(timer);
        timeout.registered.store(true, Ordering::SeqCst);
        state.armed = Some(timeout);
        tracing::trace!(timeout = %self.label, delay = ?self.delay, "timeout armed");
        Ok(())
    }
}

impl TimeoutManager for ScheduledTimeoutManager {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_running(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    fn start(&self) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        if state.armed.is_some() {
            return Ok(());
        }
        self.arm(&mut state)
    }

    fn restart(&self) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        state.cancel_all();
        self.arm(&mut state)
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if state.armed.is_some() {
            tracing::trace!(timeout = %self.label, "timeout cancelled");
        }
        state.cancel_all();
    }
}

impl Drop for ScheduledTimeoutManager {
    fn drop(&mut self) {
        self.state.lock().cancel_all();
    }
}

impl fmt::Debug for ScheduledTimeoutManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTimeoutManager")
            .field("label", &self.label)
            .field("delay", &self.delay)
            .field("context", &self.context.name())
            .field("running", &self.is_running())
            .finish()
    }
}
