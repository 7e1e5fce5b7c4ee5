//! Synchronization controller
//!
//! Runs the per-step input exchange with the remote peer and decides whether
//! the host continues, waits for the peer, or fast-forwards to catch up.
//!
//! # Architecture
//!
//! ```text
//! Idle -> AwaitingLocalReady -> Running <-> Stalling
//!                                  ^  \
//!                                  |   v
//!                              FastForwarding
//!
//! any active state -> Terminated (local quit, peer goodbye, link loss)
//! ```

mod controller;
mod input;
mod session;
mod types;

#[cfg(test)]
mod tests;

pub use controller::SyncController;
pub use input::{ConfirmedStep, InputExchange};
pub use session::{Session, SessionStats};
pub use types::{FfwIntensity, StepResponse, SyncEvent, SyncState, TerminationReason};

/// Controller misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("a session is already active")]
    SessionActive,
}
