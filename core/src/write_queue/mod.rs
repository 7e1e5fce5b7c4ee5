//! Durable write queue
//!
//! Replay data is produced on the step-driver thread and written on a
//! dedicated worker so the simulation never waits on the filesystem.
//!
//! A session's replay is a sequence of messages sharing one tag:
//!
//! ```text
//! Create(tag) -> Append(record)* -> Close(metadata record)
//! ```

mod metadata;
mod queue;
mod record;
mod sink;


use std::io;

pub use metadata::ReplayMetadata;
pub use queue::WriteQueue;
pub use record::{REPLAY_MAGIC, REPLAY_VERSION, ReplayRecord, read_replay, write_header};
pub use sink::{MemorySink, ReplayFileSink, WriteSink};

/// What the sink does with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    /// Start a new output for the tag
    Create,
    /// Add bytes to the tag's output
    Append,
    /// Write the final bytes and finish the tag's output
    Close,
    /// Throw away the tag's unfinished output
    Abort,
}

/// One unit of work for the writer thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMessage {
    /// Session the write belongs to
    pub tag: String,
    pub operation: WriteOperation,
    pub data: Vec<u8>,
}

impl WriteMessage {
    pub fn create(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            operation: WriteOperation::Create,
            data: Vec::new(),
        }
    }

    pub fn append(tag: impl Into<String>, record: &ReplayRecord) -> io::Result<Self> {
        Ok(Self {
            tag: tag.into(),
            operation: WriteOperation::Append,
            data: record.to_bytes()?,
        })
    }

    /// Close the tag's output with a metadata record.
    pub fn close(tag: impl Into<String>, metadata: ReplayMetadata) -> io::Result<Self> {
        Ok(Self {
            tag: tag.into(),
            operation: WriteOperation::Close,
            data: ReplayRecord::Metadata(metadata).to_bytes()?,
        })
    }

    /// Abandon the tag's output without finishing it.
    pub fn abort(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            operation: WriteOperation::Abort,
            data: Vec::new(),
        }
    }
}

/// Write queue failures.
#[derive(Debug, thiserror::Error)]
pub enum WriteQueueError {
    #[error("write queue is closed")]
    Closed,
    #[error("failed to start writer thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] io::Error),
}
