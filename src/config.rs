use fsm_runtime_core::{ActivationHistory, ShutdownMode};
use serde::Deserialize;

/// Default prefix of worker thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "StateMachine";

/// Default number of activations kept by [`RuntimeConfig::new_history`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Settings shared by every context a factory creates.
///
/// Missing fields fall back to their defaults when deserializing:
///
/// ```rust
/// use fsm_runtime::{RuntimeConfig, ShutdownMode};
///
/// let config: RuntimeConfig = serde_json::from_str(r#"{ "release_mode": "immediate" }"#).unwrap();
/// assert_eq!(config.thread_name_prefix, "StateMachine");
/// assert_eq!(config.release_mode, ShutdownMode::Immediate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// First segment of every worker thread name.
    pub thread_name_prefix: String,
    /// How [`ExecutionFactory::release_executor`](fsm_runtime_core::ExecutionFactory::release_executor)
    /// shuts a context down.
    pub release_mode: ShutdownMode,
    pub history_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            release_mode: ShutdownMode::Graceful,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_release_mode(mut self, mode: ShutdownMode) -> Self {
        self.release_mode = mode;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Creates an empty activation history sized by this configuration.
    pub fn new_history(&self) -> ActivationHistory {
        ActivationHistory::with_capacity(self.history_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.thread_name_prefix, "StateMachine");
        assert_eq!(config.release_mode, ShutdownMode::Graceful);
        assert_eq!(config.new_history().capacity(), DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = RuntimeConfig::default()
            .with_thread_name_prefix("Elevator")
            .with_release_mode(ShutdownMode::Immediate)
            .with_history_capacity(4);

        assert_eq!(config.thread_name_prefix, "Elevator");
        assert_eq!(config.release_mode, ShutdownMode::Immediate);
        assert_eq!(config.new_history().capacity(), 4);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}
