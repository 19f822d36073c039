//! Core runtime types for fsm-runtime.
//!
//! This crate holds the contracts a generated state machine is written
//! against: the [`ExecutionFactory`] that hands out one sequential execution
//! context per state machine instance, the [`TimeoutManager`] for delayed
//! re-entry into that context, and the diagnostics types used to describe
//! what an activation did.

mod active_states;
mod error;
mod execution;
mod history;

pub use active_states::{RootContext, describe_active_states, format_active_states};
pub use error::{ExecutionError, FormatError};
pub use execution::{
    ExecutionFactory, ShutdownMode, Timeout, TimeoutAction, TimeoutManager, panic_message,
    simple_action, timeout_action,
};
pub use history::{ActivationHistory, ActivationHistoryEntry, Fault};
