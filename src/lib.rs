//! Chainable promises whose callbacks run on pluggable execution contexts.
//!
//! A [`Promise`] settles exactly once, either resolved with a value or
//! rejected with an [`Error`]. Reaction callbacks and chained promises built
//! with [`Promise::then`] and [`Promise::then_flat`] run on an
//! [`ExecutionContext`]; a [`Runtime`] supplies the primary and background
//! contexts used when a call site does not name one.
//!
//! ```
//! use promise_chain::{FailurePolicy, Promise, Runtime};
//!
//! let runtime = Runtime::immediate();
//! let promise = Promise::<u32>::pending(&runtime);
//! promise
//!     .on_success(|v| println!("got {}", v))
//!     .on_failure(FailurePolicy::ExcludeCancelled, |e| eprintln!("failed: {}", e));
//! promise.resolve(7);
//! ```
pub mod context;
mod error;
mod observer;
pub mod promise;
mod runtime;
mod state;
mod wait;

pub use context::{ExecutionContext, Executor, Immediate, Job, ManualQueue, WorkerPool};
pub use error::{Error, Result};
pub use promise::{FailurePolicy, Promise, Rejecter, Resolver};
pub use runtime::{Runtime, RuntimeConfig};
pub use state::State;
pub use wait::Completion;
