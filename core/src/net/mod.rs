//! Peer links
//!
//! - [`PeerLink`] - message channel to the remote peer
//! - [`UdpPeerLink`] - UDP implementation with framed messages
//! - [`LoopbackLink`] - in-process pair for tests and soak runs

mod link;
mod loopback;
pub mod messages;
mod udp;

pub use link::{LinkError, LinkStatus, PeerLink};
pub use loopback::LoopbackLink;
pub use messages::{DecodeError, GoodbyeReason, InputPacket, PeerMessage};
pub use udp::{DEFAULT_DISCONNECT_TIMEOUT, UdpPeerLink};
