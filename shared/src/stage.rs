//! Stage identifiers and the tournament-legal stage list.

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Simulation-defined stage identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct StageId(pub u16);

impl StageId {
    pub const FOUNTAIN_OF_DREAMS: StageId = StageId(0x02);
    pub const POKEMON_STADIUM: StageId = StageId(0x03);
    pub const YOSHIS_STORY: StageId = StageId(0x08);
    pub const DREAM_LAND: StageId = StageId(0x1C);
    pub const BATTLEFIELD: StageId = StageId(0x1F);
    pub const FINAL_DESTINATION: StageId = StageId(0x20);

    /// Human-readable name for legal stages, `None` for anything else.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::FOUNTAIN_OF_DREAMS => Some("Fountain of Dreams"),
            Self::POKEMON_STADIUM => Some("Pokemon Stadium"),
            Self::YOSHIS_STORY => Some("Yoshi's Story"),
            Self::DREAM_LAND => Some("Dream Land"),
            Self::BATTLEFIELD => Some("Battlefield"),
            Self::FINAL_DESTINATION => Some("Final Destination"),
            _ => None,
        }
    }

    /// Whether this stage is in [`LEGAL_STAGES`].
    pub fn is_legal(self) -> bool {
        LEGAL_STAGES.contains(&self)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:02X})", name, self.0),
            None => write!(f, "stage 0x{:02X}", self.0),
        }
    }
}

/// Stages eligible for random selection.
///
/// Order matters: peers index into this list with a seeded generator, so
/// reordering it breaks agreement between builds.
pub const LEGAL_STAGES: [StageId; 6] = [
    StageId::FOUNTAIN_OF_DREAMS,
    StageId::POKEMON_STADIUM,
    StageId::YOSHIS_STORY,
    StageId::DREAM_LAND,
    StageId::BATTLEFIELD,
    StageId::FINAL_DESTINATION,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_stage_names() {
        for stage in LEGAL_STAGES {
            assert!(stage.is_legal());
            assert!(stage.name().is_some());
        }
    }

    #[test]
    fn test_unknown_stage_display() {
        let stage = StageId(0x42);
        assert!(!stage.is_legal());
        assert_eq!(stage.to_string(), "stage 0x42");
        assert_eq!(StageId::BATTLEFIELD.to_string(), "Battlefield (0x1F)");
    }
}
