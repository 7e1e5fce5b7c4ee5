//! Peer-to-peer session messages
//!
//! Messages are serialized using bitcode inside a small framing header.
//!
//! # Wire Format
//!
//! ```text
//! [RSYN][version:u16][length:u32][bitcode payload...]
//! ```

use bitcode::{Decode, Encode};
use rollsync_shared::PlayerSelections;

use crate::step::StepIndex;

/// Protocol magic bytes
pub const RSYN_MAGIC: [u8; 4] = *b"RSYN";

/// Current protocol version
pub const RSYN_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + length (4)
pub const RSYN_HEADER_SIZE: usize = 10;

/// Everything two peers say to each other during a session.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum PeerMessage {
    /// Local selections, sent once the link is established
    Selections(PlayerSelections),
    /// Consecutive inputs starting at `start_step`
    Input(InputPacket),
    /// Sender is leaving the session
    Goodbye(GoodbyeReason),
}

/// A run of input frames for consecutive steps.
///
/// Each packet repeats every sender input the receiver has not acknowledged
/// yet, so lost datagrams are recovered by the next packet. Receivers store
/// frames by step, so repeats are harmless.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct InputPacket {
    pub start_step: StepIndex,
    pub frames: Vec<Vec<u8>>,
    /// Newest receiver step the sender holds with no gaps before it
    pub ack: Option<StepIndex>,
}

impl InputPacket {
    /// Iterate `(step, bytes)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (StepIndex, &[u8])> + '_ {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, bytes)| (self.start_step + i as StepIndex, bytes.as_slice()))
    }

    /// Step of the last frame, `None` for an empty packet.
    pub fn last_step(&self) -> Option<StepIndex> {
        let len = StepIndex::try_from(self.frames.len()).ok()?;
        (len > 0).then(|| self.start_step + len - 1)
    }
}

/// Why a peer ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum GoodbyeReason {
    /// Host asked to end the session
    Quit,
    /// Selections could not be agreed on
    SelectionMismatch,
    /// Sender gave up on an unresponsive peer
    Timeout,
}

impl std::fmt::Display for GoodbyeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quit => write!(f, "quit"),
            Self::SelectionMismatch => write!(f, "selection mismatch"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl PeerMessage {
    /// Serialize with framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bitcode::encode(self);
        let mut bytes = Vec::with_capacity(RSYN_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&RSYN_MAGIC);
        bytes.extend_from_slice(&RSYN_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Deserialize, validating magic, version, and length first.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RSYN_HEADER_SIZE {
            return Err(DecodeError::TooShort);
        }
        if bytes[0..4] != RSYN_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != RSYN_VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: RSYN_VERSION,
                got: version,
            });
        }

        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let body = &bytes[RSYN_HEADER_SIZE..];
        if body.len() < length {
            return Err(DecodeError::IncompletePayload {
                expected: length,
                got: body.len(),
            });
        }

        bitcode::decode(&body[..length]).map_err(|e| DecodeError::DecodeFailed(e.to_string()))
    }
}

/// Errors decoding a framed message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message too short for header")]
    TooShort,
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },
    #[error("incomplete payload: expected {expected} bytes, got {got}")]
    IncompletePayload { expected: usize, got: usize },
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),
}
