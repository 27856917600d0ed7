//! Asynchronous task execution.
//!
//! Submission and execution are decoupled by a bounded queue: callers hand a
//! task id to an [`ExecutorHandle`] and return; the [`Executor`] dispatch
//! loop picks it up, runs the command and reports through the task store
//! and the [`EventBus`].

pub mod events;
pub mod executor;
pub mod process;
pub mod progress;

pub use events::{EventBus, EventKind, Subscription, TaskEvent};
pub use executor::{ExecError, Executor, ExecutorHandle};
