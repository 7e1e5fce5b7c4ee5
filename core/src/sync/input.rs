//! Local and remote input bookkeeping

use std::collections::BTreeMap;

use crate::net::InputPacket;
use crate::step::{InputBuffer, InputBytes, InputFrame, InputStatus, StepIndex};

/// A step with both inputs known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedStep {
    pub step: StepIndex,
    pub local: InputBytes,
    pub remote: InputBytes,
}

/// Both sides' inputs plus the predictions handed out for missing remote
/// input.
#[derive(Debug, Default)]
pub struct InputExchange {
    local: InputBuffer,
    remote: InputBuffer,
    /// Remote input the host simulated with before the real one arrived
    predicted: BTreeMap<StepIndex, InputBytes>,
    /// Earliest step whose prediction proved wrong since the last take
    mispredicted: Option<StepIndex>,
    /// Newest remote step with no gaps before it
    remote_frontier: Option<StepIndex>,
    /// Newest local step the peer reported holding with no gaps before it
    peer_ack: Option<StepIndex>,
    /// Upper bound on frames in one outgoing packet
    max_packet_frames: usize,
}

impl InputExchange {
    pub fn new(max_packet_frames: usize) -> Self {
        Self {
            max_packet_frames: max_packet_frames.max(1),
            ..Default::default()
        }
    }

    /// Store local input for `step` and build the packet to send.
    ///
    /// The packet resends every local frame after the peer's last
    /// acknowledgement, oldest first, so any run of lost packets is repaired
    /// by the next one that arrives. It ends at `step` unless that would
    /// exceed `max_packet_frames`.
    pub fn record_local(&mut self, step: StepIndex, bytes: &[u8]) -> InputPacket {
        self.local.insert(InputFrame::local(step, bytes));

        let first_unacked = self.peer_ack.map(|ack| ack + 1);
        let mut start = step;
        while first_unacked.is_none_or(|first| start > first) && self.local.contains(start - 1) {
            start -= 1;
        }
        let end = step.min(start + self.max_packet_frames as StepIndex - 1);
        let frames = self
            .local
            .since(start)
            .take_while(|frame| frame.step <= end)
            .map(|frame| frame.bytes.to_vec())
            .collect();
        InputPacket {
            start_step: start,
            frames,
            ack: self.remote_frontier,
        }
    }

    /// Store remote frames and the peer's acknowledgement. Returns how many
    /// steps were new.
    pub fn receive_remote(&mut self, packet: &InputPacket) -> usize {
        if let Some(ack) = packet.ack {
            self.peer_ack = Some(self.peer_ack.map_or(ack, |current| current.max(ack)));
        }

        let mut fresh = 0;
        for (step, bytes) in packet.iter() {
            if self.remote.contains(step) {
                continue;
            }
            let wrong_guess = self
                .predicted
                .remove(&step)
                .is_some_and(|guess| guess.as_slice() != bytes);
            if wrong_guess {
                self.mispredicted = Some(self.mispredicted.map_or(step, |s| s.min(step)));
            }
            self.remote.insert(InputFrame::remote(step, bytes));
            fresh += 1;
        }

        let mut next = self
            .remote_frontier
            .map_or(packet.start_step, |frontier| frontier + 1);
        while self.remote.contains(next) {
            self.remote_frontier = Some(next);
            next += 1;
        }
        fresh
    }

    /// Remote input for `step`, or the newest earlier one as a prediction.
    ///
    /// Predictions are remembered so a later mismatch can be reported. With
    /// no remote input at all the host falls back to neutral input, which is
    /// remembered as an empty guess.
    pub fn remote_or_predict(&mut self, step: StepIndex) -> Option<(InputFrame, InputStatus)> {
        let Some((frame, status)) = self.remote.get_or_predict(step) else {
            self.predicted.insert(step, InputBytes::new());
            return None;
        };
        let frame = frame.clone();
        if status == InputStatus::Predicted {
            self.predicted.insert(step, frame.bytes.clone());
        }
        Some((frame, status))
    }

    /// Earliest mispredicted step since the last call.
    pub fn take_mispredicted(&mut self) -> Option<StepIndex> {
        self.mispredicted.take()
    }

    pub fn latest_local(&self) -> Option<StepIndex> {
        self.local.latest_step()
    }

    pub fn latest_remote(&self) -> Option<StepIndex> {
        self.remote.latest_step()
    }

    /// Newest remote step with every earlier remote step present.
    pub fn remote_frontier(&self) -> Option<StepIndex> {
        self.remote_frontier
    }

    /// Newest step for which both sides have input, with no remote gaps
    /// before it.
    pub fn confirmed_step(&self) -> Option<StepIndex> {
        Some(self.latest_local()?.min(self.remote_frontier?))
    }

    /// Both inputs for `step`, if known.
    pub fn confirmed(&self, step: StepIndex) -> Option<ConfirmedStep> {
        Some(ConfirmedStep {
            step,
            local: self.local.get(step)?.bytes.clone(),
            remote: self.remote.get(step)?.bytes.clone(),
        })
    }

    /// Remote frames from `from` onward.
    pub fn remote_since(&self, from: StepIndex) -> impl Iterator<Item = &InputFrame> {
        self.remote.since(from)
    }

    /// Newest local step the peer has acknowledged.
    pub fn peer_ack(&self) -> Option<StepIndex> {
        self.peer_ack
    }

    /// Forget everything older than `step`. Local frames the peer has not
    /// acknowledged are kept for resending.
    pub fn prune_before(&mut self, step: StepIndex) {
        let local_cut = self.peer_ack.map_or(StepIndex::MIN, |ack| step.min(ack + 1));
        self.local.prune_before(local_cut);
        self.remote.prune_before(step);
        self.predicted = self.predicted.split_off(&step);
    }

    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
        self.predicted.clear();
        self.mispredicted = None;
        self.remote_frontier = None;
        self.peer_ack = None;
    }
}
