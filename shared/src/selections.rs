//! Player selections exchanged while negotiating a session.
//!
//! Selections start out partial (the host may not have picked a stage yet)
//! and are merged as the player makes choices. Once both peers have exchanged
//! them, [`PlayerSelections::validate_complete`] decides whether the match can
//! start.

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::ids::ConnectCode;
use crate::stage::StageId;

/// Simulation-defined character identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(transparent)]
pub struct CharacterId(pub u8);

/// Character, costume, stage, and identity chosen by one player.
///
/// Any field may be unset while the player is still choosing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PlayerSelections {
    /// Selected character
    #[serde(default)]
    pub character: Option<CharacterId>,
    /// Costume color index for the character
    #[serde(default)]
    pub character_color: u8,
    /// Selected stage, `None` to let the session pick one
    #[serde(default)]
    pub stage: Option<StageId>,
    /// Identity of the player
    #[serde(default)]
    pub connect_code: Option<ConnectCode>,
}

impl PlayerSelections {
    /// Selections with a character and connect code, stage left open.
    pub fn new(character: CharacterId, connect_code: ConnectCode) -> Self {
        Self {
            character: Some(character),
            character_color: 0,
            stage: None,
            connect_code: Some(connect_code),
        }
    }

    /// Builder-style stage setter.
    pub fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Builder-style color setter.
    pub fn with_color(mut self, color: u8) -> Self {
        self.character_color = color;
        self
    }

    /// Overwrite fields that are set in `update`.
    ///
    /// Unset fields in `update` leave the current value alone, so a host can
    /// send only what changed. The color always follows the latest character
    /// choice.
    pub fn merge(&mut self, update: &PlayerSelections) {
        if let Some(character) = update.character {
            self.character = Some(character);
            self.character_color = update.character_color;
        }
        if let Some(stage) = update.stage {
            self.stage = Some(stage);
        }
        if let Some(code) = &update.connect_code {
            self.connect_code = Some(code.clone());
        }
    }

    /// Check that everything required to start a match is present.
    ///
    /// The stage is not required: an unset stage is resolved by the session.
    pub fn validate_complete(&self) -> Result<(), SelectionMismatch> {
        if self.connect_code.is_none() {
            return Err(SelectionMismatch::MissingConnectCode);
        }
        if self.character.is_none() {
            return Err(SelectionMismatch::MissingCharacter {
                connect_code: self.connect_code.clone(),
            });
        }
        Ok(())
    }
}

/// Reasons a set of selections cannot start a match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionMismatch {
    #[error("no character selected (player {connect_code:?})")]
    MissingCharacter { connect_code: Option<ConnectCode> },
    #[error("no connect code provided")]
    MissingConnectCode,
}
