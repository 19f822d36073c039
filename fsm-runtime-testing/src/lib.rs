//! Deterministic execution factory for testing state machines.
//!
//! [`ManualExecutionFactory`] implements the same [`ExecutionFactory`]
//! contract as the production factory, but every state machine shares one
//! execution context and timeouts never fire on their own. Tests trigger them
//! by label instead of waiting for the wall clock.
//!
//! ```rust
//! use std::time::Duration;
//! use fsm_runtime_core::{ExecutionFactory, TimeoutManager, simple_action};
//! use fsm_runtime_testing::ManualExecutionFactory;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fsm_runtime_core::ExecutionError> {
//! let factory = ManualExecutionFactory::new()?;
//! let context = factory.create_executor("Door")?;
//! let close = factory.create_timeout(
//!     &context,
//!     "close",
//!     Duration::from_secs(3600),
//!     simple_action(|| println!("closing")),
//!     true,
//! )?;
//!
//! assert!(factory.trigger_timeout("close").await?);
//! assert!(!close.is_running());
//! # Ok(())
//! # }
//! ```

mod timeout;

use std::collections::HashMap;
use std::time::Duration;

use fsm_runtime::{ExecutionContext, WorkerRegistry};
use fsm_runtime_core::{
    ExecutionError, ExecutionFactory, ShutdownMode, TimeoutAction, TimeoutManager,
};
use parking_lot::Mutex;

pub use crate::timeout::ManualTimeoutManager;

/// Thread name of the shared test execution context.
pub const TEST_THREAD_NAME: &str = "StateMachineTestExecutionThread";

/// Execution factory with one shared context and manually triggered timeouts.
#[derive(Debug)]
pub struct ManualExecutionFactory {
    context: ExecutionContext,
    timeouts: Mutex<HashMap<String, ManualTimeoutManager>>,
}

impl ManualExecutionFactory {
    pub fn new() -> Result<Self, ExecutionError> {
        Ok(Self {
            context: ExecutionContext::spawn(TEST_THREAD_NAME, &WorkerRegistry::new())?,
            timeouts: Mutex::default(),
        })
    }

    /// The context handed out by every [`ExecutionFactory::create_executor`] call.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Registered timeout for `label`, if any.
    pub fn timeout(&self, label: &str) -> Option<ManualTimeoutManager> {
        self.timeouts.lock().get(label).cloned()
    }

    pub fn is_timeout_running(&self, label: &str) -> bool {
        self.timeouts
            .lock()
            .get(label)
            .is_some_and(|timeout| timeout.is_running())
    }

    /// Runs the action of the timeout registered as `label` and waits for it.
    ///
    /// Returns `false` without doing anything when no such timeout is armed.
    /// A panicking action is reported as [`ExecutionError::Panicked`].
    pub async fn trigger_timeout(&self, label: &str) -> Result<bool, ExecutionError> {
        let Some(timeout) = self.timeout(label) else {
            tracing::debug!(timeout = %label, "no timeout registered under this label");
            return Ok(false);
        };
        timeout.trigger(&self.context).await
    }

    /// Waits until everything queued so far has run.
    pub async fn wait_for_current_tasks_done(&self) -> Result<(), ExecutionError> {
        self.context.wait_for_queued().await
    }

    /// Waits until the shared context is idle, including follow-up work.
    pub async fn wait_for_all_tasks_done(&self) -> Result<(), ExecutionError> {
        self.context.wait_until_idle().await
    }

    /// `false` once any unit of work or timeout action has panicked.
    pub fn executor_is_healthy(&self) -> bool {
        self.context.fault_count() == 0
    }
}

impl ExecutionFactory for ManualExecutionFactory {
    type Context = ExecutionContext;
    type Timeout = ManualTimeoutManager;

    fn create_executor(&self, _name_fragment: &str) -> Result<ExecutionContext, ExecutionError> {
        Ok(self.context.clone())
    }

    /// The shared context outlives individual state machines; it is shut down
    /// when the factory is dropped.
    fn release_executor(&self, _context: &ExecutionContext) {}

    fn is_running_in_execution_context(&self) -> bool {
        self.context.is_current()
    }

    fn create_timeout(
        &self,
        _context: &ExecutionContext,
        label: &str,
        _delay: Duration,
        action: TimeoutAction,
        auto_start: bool,
    ) -> Result<ManualTimeoutManager, ExecutionError> {
        let mut timeouts = self.timeouts.lock();
        if timeouts.get(label).is_some_and(|timeout| timeout.is_running()) {
            return Err(ExecutionError::TimeoutAlreadyRunning {
                label: label.to_string(),
            });
        }

        let timeout = ManualTimeoutManager::new(label, action);
        if auto_start {
            timeout.start()?;
        }
        timeouts.insert(label.to_string(), timeout.clone());
        Ok(timeout)
    }
}

impl Drop for ManualExecutionFactory {
    fn drop(&mut self) {
        self.context.shutdown(ShutdownMode::Graceful);
    }
}
