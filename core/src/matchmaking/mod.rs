//! Session negotiation
//!
//! Finds an opponent through a [`MatchmakingService`], opens the peer link,
//! exchanges [`PlayerSelections`](rollsync_shared::PlayerSelections), and
//! resolves the stage both peers will play on. The result is a
//! [`Session`](crate::sync::Session) ready for the sync controller.
//!
//! ```text
//! Disconnected -> Searching -> OpponentFound -> ExchangingSelections -> Connected
//!       ^                                                                  |
//!       +------------------------- CleaningUp <----------------------------+
//! ```
//!
//! Any failure (timeout, mismatch, link loss) goes through `CleaningUp` back
//! to `Disconnected`.

mod negotiator;
mod service;
mod stage;
mod types;

#[cfg(test)]
mod tests;

pub use negotiator::SessionNegotiator;
pub use service::{LocalBroker, LocalMatchmaking, MatchmakingService};
pub use stage::{random_stage, resolve_stage};
pub use types::{
    NegotiationError, NegotiationEvent, NegotiationState, OpponentInfo, SearchPoll, ServiceError,
};
