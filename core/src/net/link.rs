//! Peer connection handle

use std::net::SocketAddr;

use super::messages::{DecodeError, PeerMessage};

/// Whether a link can still carry messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    /// Closed locally, closed by the peer, or timed out
    Disconnected,
}

/// Peer link errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid address '{0}'")]
    AddressParse(String),
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),
    #[error("link is closed")]
    Closed,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A message channel to the remote peer.
///
/// Implementations never block: `poll` returns whatever has arrived since
/// the previous call.
pub trait PeerLink: Send {
    fn send(&mut self, message: &PeerMessage) -> Result<(), LinkError>;

    /// Drain received messages in arrival order.
    fn poll(&mut self) -> Vec<PeerMessage>;

    fn status(&self) -> LinkStatus;

    /// Stop sending and receiving. Idempotent.
    fn close(&mut self);

    /// Remote endpoint, when the link has one.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl std::fmt::Debug for dyn PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("status", &self.status())
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}
