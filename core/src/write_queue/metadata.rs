//! Replay metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rollsync_shared::{PlayerSelections, StageId};
use serde::{Deserialize, Serialize};

use crate::step::StepIndex;
use crate::sync::Session;

/// Summary of a session, stored as JSON in the replay's closing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMetadata {
    pub session_id: u64,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Newest step with both players' input, `None` if play never started
    pub last_step: Option<StepIndex>,
    /// Port of the player who recorded this file
    pub local_port: u8,
    /// Selections in port order
    pub players: Vec<PlayerSelections>,
    pub stage: StageId,
    /// Confirmed steps played per port and character id
    #[serde(default)]
    pub character_usage: BTreeMap<u8, BTreeMap<u8, u32>>,
}

impl ReplayMetadata {
    /// Metadata for `session`, ended now.
    pub fn from_session(session: &Session) -> Self {
        let (port1, port2) = session.players();
        let played = match (session.stats.first_step, session.stats.last_processed_step) {
            (Some(first), Some(last)) if last >= first => {
                u32::try_from(last - first + 1).unwrap_or(u32::MAX)
            }
            _ => 0,
        };
        let mut character_usage = BTreeMap::new();
        if played > 0 {
            for (port, player) in [(1u8, port1), (2u8, port2)] {
                if let Some(character) = player.character {
                    character_usage
                        .entry(port)
                        .or_insert_with(BTreeMap::new)
                        .insert(character.0, played);
                }
            }
        }
        Self {
            session_id: session.id,
            seed: session.seed,
            started_at: session.started_at,
            ended_at: Utc::now(),
            last_step: session.stats.last_processed_step,
            local_port: session.local_port,
            players: vec![port1.clone(), port2.clone()],
            stage: session.stage,
            character_usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use rollsync_shared::{CharacterId, ConnectCode};

    use super::*;
    use crate::net::LoopbackLink;

    #[test]
    fn test_from_session_uses_port_order() {
        let (link, _peer) = LoopbackLink::pair();
        let local = PlayerSelections::new(CharacterId(2), ConnectCode::parse("FOX#1").unwrap());
        let remote = PlayerSelections::new(CharacterId(9), ConnectCode::parse("MRTH#9").unwrap());
        let mut session = Session::new(
            Box::new(link),
            local.clone(),
            remote.clone(),
            StageId::DREAM_LAND,
            77,
            2,
        );
        session.stats.first_step = Some(-123);
        session.stats.last_processed_step = Some(300);

        let metadata = ReplayMetadata::from_session(&session);
        assert_eq!(metadata.players, vec![remote, local]);
        assert_eq!(metadata.character_usage[&1], BTreeMap::from([(9, 424)]));
        assert_eq!(metadata.character_usage[&2], BTreeMap::from([(2, 424)]));
        assert_eq!(metadata.last_step, Some(300));
        assert_eq!(metadata.session_id, 77);
        assert!(metadata.ended_at >= metadata.started_at);

        let json = serde_json::to_string(&metadata).unwrap();
        let decoded: ReplayMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_no_character_usage_before_play() {
        let (link, _peer) = LoopbackLink::pair();
        let selections = PlayerSelections::new(CharacterId(2), ConnectCode::parse("FOX#1").unwrap());
        let session = Session::new(
            Box::new(link),
            selections.clone(),
            selections,
            StageId::DREAM_LAND,
            1,
            1,
        );
        assert!(ReplayMetadata::from_session(&session).character_usage.is_empty());

        // Files written before usage was recorded still load
        let json = r#"{"session_id":1,"seed":1,"started_at":"2024-01-01T00:00:00Z","ended_at":"2024-01-01T00:01:00Z","last_step":null,"local_port":1,"players":[],"stage":8}"#;
        let decoded: ReplayMetadata = serde_json::from_str(json).unwrap();
        assert!(decoded.character_usage.is_empty());
    }
}
