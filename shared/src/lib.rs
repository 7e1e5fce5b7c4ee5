//! Shared types for rollsync peers.
//!
//! Everything in this crate travels between the two peers of a session or
//! between the host simulation and the core, so all types derive both serde
//! (config files, replay metadata) and bitcode (wire messages).

pub mod ids;
pub mod selections;
pub mod stage;

pub use ids::{CONNECT_CODE_LENGTH, ConnectCode, ConnectCodeError};
pub use selections::{CharacterId, PlayerSelections, SelectionMismatch};
pub use stage::{LEGAL_STAGES, StageId};
