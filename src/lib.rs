//! # fsm-runtime
//!
//! Runtime core for generated state machines: every tick, event dispatch and
//! timeout action of one state machine instance runs serialized on a
//! dedicated execution context, and timeouts can be cancelled without racing
//! their own firing.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//!
//! use fsm_runtime::{ExecutionFactory, ThreadedExecutionFactory, TimeoutManager, simple_action};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fsm_runtime::ExecutionError> {
//! let factory = ThreadedExecutionFactory::default();
//! let context = factory.create_executor("Turnstile")?;
//!
//! let locked = Arc::new(AtomicBool::new(false));
//! let flag = locked.clone();
//! let relock = factory.create_timeout(
//!     &context,
//!     "relock",
//!     Duration::from_millis(10),
//!     simple_action(move || flag.store(true, Ordering::SeqCst)),
//!     false,
//! )?;
//!
//! relock.start()?;
//! tokio::time::sleep(Duration::from_millis(50)).await;
//! context.wait_until_idle().await?;
//! assert!(locked.load(Ordering::SeqCst));
//!
//! factory.release_executor(&context);
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod factory;
mod timeout;

pub use crate::config::{DEFAULT_HISTORY_CAPACITY, DEFAULT_THREAD_NAME_PREFIX, RuntimeConfig};
pub use crate::context::{Completion, ExecutionContext, ScheduledWork, WorkerRegistry};
pub use crate::factory::ThreadedExecutionFactory;
pub use crate::timeout::ScheduledTimeoutManager;

#[doc(inline)]
pub use fsm_runtime_core::*;
