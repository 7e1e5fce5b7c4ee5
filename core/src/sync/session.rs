//! Negotiated session

use chrono::{DateTime, Utc};
use rollsync_shared::{PlayerSelections, StageId};

use crate::net::{PeerLink, PeerMessage};
use crate::step::StepIndex;

/// Counters scoped to one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Consecutive stalled steps, reset on resume
    pub stall_count: u32,
    /// Stalled steps over the whole session
    pub total_stalled_steps: u64,
    /// Latched once `stall_count` passes the threshold
    pub connection_stalled: bool,
    /// Step of the first local input
    pub first_step: Option<StepIndex>,
    /// Newest step with both local and remote input
    pub last_processed_step: Option<StepIndex>,
    /// Last step answered with a fast-forward
    pub last_ffw_step: Option<StepIndex>,
    /// Steps answered with a fast-forward
    pub ffw_steps: u64,
    /// Predictions that turned out wrong
    pub mispredictions: u64,
}

/// A live two-player session.
///
/// Owns the peer link. Built by the negotiator once both peers agreed on
/// selections, then handed to the controller.
#[derive(Debug)]
pub struct Session {
    /// Identical on both peers (derived from the shared seed)
    pub id: u64,
    pub(crate) link: Box<dyn PeerLink>,
    pub local: PlayerSelections,
    pub remote: PlayerSelections,
    /// Resolved stage, identical on both peers
    pub stage: StageId,
    /// Shared seed from matchmaking
    pub seed: u64,
    /// 1 or 2
    pub local_port: u8,
    pub started_at: DateTime<Utc>,
    pub stats: SessionStats,
    /// Messages that arrived before the controller took over
    pub(crate) pending: Vec<PeerMessage>,
}

impl Session {
    pub fn new(
        link: Box<dyn PeerLink>,
        local: PlayerSelections,
        remote: PlayerSelections,
        stage: StageId,
        seed: u64,
        local_port: u8,
    ) -> Self {
        Self {
            id: seed,
            link,
            local,
            remote,
            stage,
            seed,
            local_port,
            started_at: Utc::now(),
            stats: SessionStats::default(),
            pending: Vec::new(),
        }
    }

    /// Queue messages received during negotiation for the controller.
    pub(crate) fn with_pending(mut self, pending: Vec<PeerMessage>) -> Self {
        self.pending = pending;
        self
    }

    /// Selections in port order: `(port 1, port 2)`.
    pub fn players(&self) -> (&PlayerSelections, &PlayerSelections) {
        if self.local_port == 1 {
            (&self.local, &self.remote)
        } else {
            (&self.remote, &self.local)
        }
    }

    /// Name used for this session's replay file and write-queue tag.
    pub fn tag(&self) -> String {
        format!("{:016x}", self.id)
    }

    pub fn link(&self) -> &dyn PeerLink {
        self.link.as_ref()
    }
}
