//! Negotiation states, opponent info, and errors

use std::net::SocketAddr;
use std::time::Duration;

use bitcode::{Decode, Encode};
use rollsync_shared::{ConnectCode, SelectionMismatch};

use crate::net::LinkError;

/// Negotiator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum NegotiationState {
    /// No search, no session
    #[default]
    Disconnected,
    /// Waiting for the matchmaking service to pair us
    Searching,
    /// Paired, opening the peer link
    OpponentFound,
    /// Link open, waiting for the peer's selections
    ExchangingSelections,
    /// Session built
    Connected,
    /// Tearing down
    CleaningUp,
}

/// What the matchmaking service tells us about our opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpponentInfo {
    pub remote_code: ConnectCode,
    /// Network endpoint, `None` for in-process links
    pub endpoint: Option<SocketAddr>,
    /// Our port: 1 or 2
    pub local_port: u8,
    /// Seed shared by both peers
    pub seed: u64,
}

/// One poll of the matchmaking service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPoll {
    Pending,
    Found(OpponentInfo),
    Failed(String),
}

/// Progress reported by `SessionNegotiator::poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Nothing changed
    Pending,
    /// Paired and link opened; selections sent
    OpponentFound(OpponentInfo),
    /// Session ready for `take_session`
    Connected,
}

/// Matchmaking service failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("matchmaking unavailable: {0}")]
    Unavailable(String),
    #[error("no search in progress")]
    NotSearching,
}

/// Negotiation failures. Every failure returns the negotiator to
/// `Disconnected`.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("search timed out after {0:?}")]
    SearchTimeout(Duration),
    #[error("selection mismatch: {0}")]
    SelectionMismatch(#[from] SelectionMismatch),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("connection failed: {0}")]
    Connection(#[from] LinkError),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: NegotiationState,
    },
}
