//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams (the upstream caller enqueues
//!   and returns immediately)
//! - Worker consumption with retry/DLQ and stale-claim recovery
//!
//! Task progress does not flow through here; workers write it to the
//! record store.

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{DetectObjectsJob, ExtractFramesJob, ProcessVideoJob, QueueJob};
pub use queue::{JobQueue, QueueConfig};
