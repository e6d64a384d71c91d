//! Record store for videos, detections, processed frames and tasks.
//!
//! The `RecordStore` trait carries the data-model constraints; the
//! in-memory backend enforces them for tests and single-node runs.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::RecordStore;
