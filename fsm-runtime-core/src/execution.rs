//! Contracts between generated state machines and their execution runtime.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ExecutionError;

/// Shutdown mode for an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Graceful shutdown: the worker keeps draining everything already queued
    /// before it terminates. New submissions are rejected immediately.
    #[default]
    Graceful,
    /// Immediate shutdown: queued but not yet started work is dropped. Callers
    /// waiting on that work observe [`ExecutionError::Interrupted`].
    Immediate,
}

/// A single armed timeout, as seen by its action.
///
/// The action receives the firing timeout so that long-running actions can
/// re-check cancellation while they execute.
pub trait Timeout: Send + Sync {
    /// Label the timeout was created with.
    fn label(&self) -> &str;

    /// Whether the timeout was cancelled or superseded by a restart.
    fn is_cancelled(&self) -> bool;
}

/// Action run on the execution context when a timeout elapses.
pub type TimeoutAction = Arc<dyn Fn(&dyn Timeout) + Send + Sync>;

/// Wraps a closure that inspects the firing [`Timeout`].
pub fn timeout_action<F>(action: F) -> TimeoutAction
where
    F: Fn(&dyn Timeout) + Send + Sync + 'static,
{
    Arc::new(action)
}

/// Wraps a closure that does not care about the firing [`Timeout`].
pub fn simple_action<F>(action: F) -> TimeoutAction
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(move |_: &dyn Timeout| action())
}

/// Delayed action bound to one execution context.
///
/// The manager is either idle or armed. It owns at most one pending timeout
/// at a time; the action itself always runs on the bound context.
pub trait TimeoutManager: Send + Sync {
    /// Label distinguishing this timeout within its state machine.
    fn label(&self) -> &str;

    /// Returns `true` while a timeout is armed and its action has not run.
    fn is_running(&self) -> bool;

    /// Arms the timeout unless it is already armed.
    ///
    /// Starting an armed timeout does not reset its delay.
    fn start(&self) -> Result<(), ExecutionError>;

    /// Cancels any armed timeout and arms a fresh one with the full delay.
    fn restart(&self) -> Result<(), ExecutionError>;

    /// Cancels the armed timeout. Once this returns the pending action will
    /// not be invoked, even if its callback is already queued.
    fn cancel(&self);
}

/// Factory handing out execution contexts and timeouts to state machines.
///
/// Every tick, event dispatch and timeout callback of one state machine
/// instance runs serialized on the context obtained from
/// [`ExecutionFactory::create_executor`].
pub trait ExecutionFactory: Send + Sync {
    /// Sequential execution context shared by one state machine instance.
    type Context: Clone + Send + Sync + 'static;
    /// Timeout manager produced by [`ExecutionFactory::create_timeout`].
    type Timeout: TimeoutManager;

    /// Creates the execution context for a new state machine instance.
    ///
    /// `name_fragment` ends up in the worker's thread name so that log lines
    /// can be attributed to an instance.
    fn create_executor(&self, name_fragment: &str) -> Result<Self::Context, ExecutionError>;

    /// Stops the context from accepting work and lets its worker terminate
    /// once drained. Releasing twice is a no-op.
    fn release_executor(&self, context: &Self::Context);

    /// Returns `true` when called from a unit of work running on a context
    /// created by this factory.
    fn is_running_in_execution_context(&self) -> bool;

    /// Creates a timeout bound to `context`, armed right away if `auto_start`
    /// is set.
    fn create_timeout(
        &self,
        context: &Self::Context,
        label: &str,
        delay: Duration,
        action: TimeoutAction,
        auto_start: bool,
    ) -> Result<Self::Timeout, ExecutionError>;
}

/// Renders a panic payload caught with [`std::panic::catch_unwind`].
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fired(bool);

    impl Timeout for Fired {
        fn label(&self) -> &str {
            "fired"
        }

        fn is_cancelled(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn simple_action_ignores_timeout_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let action = simple_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        action(&Fired(false));
        action(&Fired(true));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timeout_action_sees_cancellation() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let action = timeout_action(move |timeout| {
            if !timeout.is_cancelled() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        action(&Fired(true));
        action(&Fired(false));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let from_str = std::panic::catch_unwind(|| -> u8 { panic!("boom") }).unwrap_err();
        assert_eq!(panic_message(from_str.as_ref()), "boom");

        let from_string =
            std::panic::catch_unwind(|| -> u8 { panic!("{} {}", "formatted", 7) }).unwrap_err();
        assert_eq!(panic_message(from_string.as_ref()), "formatted 7");

        let other = std::panic::catch_unwind(|| -> u8 { std::panic::panic_any(42u8) }).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn shutdown_mode_defaults_to_graceful() {
        assert_eq!(ShutdownMode::default(), ShutdownMode::Graceful);
        let mode: ShutdownMode = serde_json::from_str("\"immediate\"").unwrap();
        assert_eq!(mode, ShutdownMode::Immediate);
    }
}
