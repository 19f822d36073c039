/// Error type returned by execution contexts, factories and timeout managers.
///
/// Every variant except [`ExecutionError::Panicked`] and
/// [`ExecutionError::Interrupted`] signals a usage error on the caller's
/// side. None of them are retried by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Work was submitted to a context that has already been released.
    #[error("execution context `{context}` has been released")]
    Released {
        /// Thread name of the released context.
        context: String,
    },
    /// The context shut down before the awaited work could run.
    #[error("execution context `{context}` shut down before the work completed")]
    Interrupted {
        /// Thread name of the context.
        context: String,
    },
    /// The worker thread or its runtime could not be created.
    #[error("failed to spawn execution context `{context}`: {reason}")]
    Spawn {
        /// Requested thread name.
        context: String,
        /// Underlying I/O failure.
        reason: String,
    },
    /// The awaited unit of work panicked.
    #[error("unit of work on `{context}` panicked: {message}")]
    Panicked {
        /// Thread name of the context.
        context: String,
        /// Panic payload rendered as text.
        message: String,
    },
    /// A unit of work tried to block on work queued behind itself.
    #[error("cannot block on `{context}` from its own worker thread")]
    SelfWait {
        /// Thread name of the context.
        context: String,
    },
    /// A timeout with this label is registered and still armed.
    #[error("timeout `{label}` already exists and is running")]
    TimeoutAlreadyRunning {
        /// Label of the conflicting timeout.
        label: String,
    },
}

/// Error returned when active states cannot be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// No state information was supplied at all.
    #[error("no active state information available")]
    MissingActiveStates,
}
