use std::time::Duration;

use fsm_runtime_core::{ExecutionError, ExecutionFactory, TimeoutAction, TimeoutManager};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, WorkerRegistry};
use crate::timeout::ScheduledTimeoutManager;

/// Production [`ExecutionFactory`]: one dedicated worker thread per state
/// machine instance and wall-clock timeouts.
///
/// ```rust
/// use std::time::Duration;
/// use fsm_runtime::{ExecutionFactory, ThreadedExecutionFactory, TimeoutManager, simple_action};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fsm_runtime::ExecutionError> {
/// let factory = ThreadedExecutionFactory::default();
/// let context = factory.create_executor("Door")?;
/// let timeout = factory.create_timeout(
///     &context,
///     "close",
///     Duration::from_secs(5),
///     simple_action(|| println!("closing")),
///     true,
/// )?;
/// assert!(timeout.is_running());
///
/// timeout.cancel();
/// factory.release_executor(&context);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ThreadedExecutionFactory {
    config: RuntimeConfig,
    workers: WorkerRegistry,
}

impl ThreadedExecutionFactory {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            workers: WorkerRegistry::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Number of worker threads created by this factory that are still alive.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    fn thread_name(&self, name_fragment: &str) -> String {
        format!(
            "{}-{}-{}",
            self.config.thread_name_prefix,
            name_fragment,
            Uuid::new_v4()
        )
    }
}

impl ExecutionFactory for ThreadedExecutionFactory {
    type Context = ExecutionContext;
    type Timeout = ScheduledTimeoutManager;

    fn create_executor(&self, name_fragment: &str) -> Result<ExecutionContext, ExecutionError> {
        ExecutionContext::spawn(self.thread_name(name_fragment), &self.workers)
    }

    fn release_executor(&self, context: &ExecutionContext) {
        if !context.shutdown(self.config.release_mode) {
            tracing::trace!(context = %context.name(), "execution context already released");
        }
    }

    fn is_running_in_execution_context(&self) -> bool {
        self.workers.contains_current()
    }

    fn create_timeout(
        &self,
        context: &ExecutionContext,
        label: &str,
        delay: Duration,
        action: TimeoutAction,
        auto_start: bool,
    ) -> Result<ScheduledTimeoutManager, ExecutionError> {
        let timeout = ScheduledTimeoutManager::new(context.clone(), label, delay, action);
        if auto_start {
            timeout.start()?;
        }
        Ok(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsm_runtime_core::{ShutdownMode, simple_action};

    #[tokio::test]
    async fn thread_name_embeds_prefix_and_fragment() {
        let factory = ThreadedExecutionFactory::new(
            RuntimeConfig::default().with_thread_name_prefix("Lift"),
        );
        let context = factory.create_executor("Cabin").unwrap();

        assert!(context.name().starts_with("Lift-Cabin-"));
        let suffix = &context.name()["Lift-Cabin-".len()..];
        assert!(Uuid::parse_str(suffix).is_ok());
    }

    #[tokio::test]
    async fn contexts_get_distinct_names() {
        let factory = ThreadedExecutionFactory::default();
        let first = factory.create_executor("Same").unwrap();
        let second = factory.create_executor("Same").unwrap();
        assert_ne!(first.name(), second.name());
        assert_eq!(factory.live_workers(), 2);
    }

    #[tokio::test]
    async fn release_uses_configured_mode() {
        let factory = ThreadedExecutionFactory::new(
            RuntimeConfig::default().with_release_mode(ShutdownMode::Immediate),
        );
        let context = factory.create_executor("Immediate").unwrap();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let gate = context
            .submit(move || {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap();
        let queued = context.submit(|| 1).unwrap();
        started_rx.recv().unwrap();
        factory.release_executor(&context);

        gate.await.unwrap();
        assert!(matches!(queued.await, Err(ExecutionError::Interrupted { .. })));
    }

    #[tokio::test]
    async fn create_timeout_honours_auto_start() {
        let factory = ThreadedExecutionFactory::default();
        let context = factory.create_executor("Timeouts").unwrap();
        let long = Duration::from_secs(30);

        let idle = factory
            .create_timeout(&context, "idle", long, simple_action(|| {}), false)
            .unwrap();
        let armed = factory
            .create_timeout(&context, "armed", long, simple_action(|| {}), true)
            .unwrap();

        assert!(!idle.is_running());
        assert!(armed.is_running());
        assert_eq!(armed.label(), "armed");
    }
}
