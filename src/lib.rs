//! One-shot deferred values that settle exactly once and notify their
//! observers later.
//!
//! A [`Settlement`] starts pending and is settled through a [`Resolver`],
//! either fulfilled with a value or rejected with a reason. Observers chained
//! with [`then`](Settlement::then), [`and_then`](Settlement::and_then),
//! [`catch`](Settlement::catch) and [`finally`](Settlement::finally) each
//! produce a new settlement, and run through a [`Scheduler`] rather than
//! inline.
//!
//! Values implementing [`Thenable`] are adopted instead of used as payloads,
//! and settlements are thenables themselves.
//!
//! ```
//! use settlement::{Resolution, Settlement, TaskQueue};
//! let queue = TaskQueue::new();
//! let greeting = Settlement::<String, String>::with_scheduler(queue.clone(), |r| {
//!     r.resolve("X".to_string());
//!     Ok(())
//! })
//! .and_then(|v| Ok(Resolution::Value(v + "Y")));
//! assert_eq!(queue.block_on(greeting), Ok(Ok("XY".to_string())));
//! ```
use thiserror::Error;

pub mod future;
pub mod queue;
pub mod settlement;
pub mod thenable;

pub use crate::future::Settled;
pub use crate::queue::{Scheduler, Task, TaskQueue};
pub use crate::settlement::Settlement;
pub use crate::thenable::{Rejection, Resolution, Resolver, Thenable};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Nothing left to run, yet the awaited settlement is still pending.
    #[error("the task queue ran dry before the settlement settled")]
    Stalled,
}
