//! Rollback snapshot management
//!
//! Provides the step-keyed snapshot store and the buffer pool behind it.
//! - `Snapshot`: state buffer for one step with an xxHash3 checksum
//! - `BufferPool`: lazily allocated, capped free list of buffers
//! - `SnapshotStore`: active window of snapshots with explicit eviction

mod buffer;
mod pool;
mod store;

pub use buffer::Snapshot;
pub use pool::BufferPool;
pub use store::SnapshotStore;

use crate::step::StepIndex;

/// Snapshot store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// No buffer can be checked out (capacity configured to zero)
    #[error("snapshot pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },
    /// The step was never captured or has left the rollback window
    #[error("no snapshot for step {step}")]
    SnapshotNotFound { step: StepIndex },
}
