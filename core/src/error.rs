//! Crate-level error type

use crate::config::ConfigError;
use crate::diff::DiffError;
use crate::host::CommandError;
use crate::matchmaking::NegotiationError;
use crate::net::LinkError;
use crate::snapshot::SnapshotError;
use crate::sync::SyncError;
use crate::write_queue::WriteQueueError;

/// Any failure surfaced by [`SyncCore`](crate::host::SyncCore).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    WriteQueue(#[from] WriteQueueError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
