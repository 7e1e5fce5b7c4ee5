//! Rollsync Core - Rollback state synchronization
//!
//! This crate keeps a two-player simulation in lockstep over an unreliable
//! link: it stores recent state snapshots for rollback, exchanges per-step
//! inputs with the peer, decides when the host waits or catches up, and
//! negotiates the session both peers play.
//!
//! # Architecture
//!
//! - [`SnapshotStore`] - Fixed pool of state buffers, one per recent step
//! - [`DiffPipeline`] - Background delta compression of snapshots
//! - [`SyncController`] - Per-step input exchange, stall and fast-forward control
//! - [`SessionNegotiator`] - Opponent search, selection exchange, stage resolution
//! - [`WriteQueue`] - Ordered background persistence of session replays
//! - [`SyncCore`] - Facade wiring the above together for a host simulation

pub mod config;
pub mod diff;
pub mod error;
pub mod host;
pub mod matchmaking;
pub mod net;
pub mod snapshot;
pub mod step;
pub mod sync;
pub mod write_queue;

pub use config::{SyncConfig, TICK_RATE};
pub use diff::{DeltaCodec, DiffError, DiffPipeline, DiffTask, XorLz4Codec};
pub use error::CoreError;
pub use host::{CleanupReport, HostCommand, OnlineStatus, SessionStatus, SyncCore};
pub use matchmaking::{
    LocalBroker, LocalMatchmaking, MatchmakingService, NegotiationError, NegotiationState,
    SessionNegotiator,
};
pub use net::{LoopbackLink, PeerLink, PeerMessage, UdpPeerLink};
pub use snapshot::{Snapshot, SnapshotError, SnapshotStore};
pub use step::{InputFrame, InputStatus, StepIndex};
pub use sync::{FfwIntensity, Session, StepResponse, SyncController, SyncEvent, SyncState};
pub use write_queue::{MemorySink, ReplayFileSink, WriteQueue, WriteSink};

// Re-export shared types used throughout the public API
pub use rollsync_shared::{CharacterId, ConnectCode, PlayerSelections, StageId};
