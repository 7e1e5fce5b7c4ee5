//! Step indices and per-step input frames.

use std::collections::BTreeMap;

use bitcode::{Decode, Encode};
use smallvec::SmallVec;

/// Simulation step number.
///
/// Signed because hosts commonly count the pre-match countdown in negative
/// steps. Shared key across snapshots, diffs and inputs.
pub type StepIndex = i32;

/// Inline storage for one step of controller input (avoids heap allocation)
/// 32 bytes covers a full pad state with analog sticks and triggers.
pub type InputBytes = SmallVec<[u8; 32]>;

/// Which side of the session produced an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum InputOrigin {
    Local,
    Remote,
}

/// Serialized input state for one step from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFrame {
    pub step: StepIndex,
    pub origin: InputOrigin,
    pub bytes: InputBytes,
}

impl InputFrame {
    pub fn local(step: StepIndex, bytes: &[u8]) -> Self {
        Self {
            step,
            origin: InputOrigin::Local,
            bytes: SmallVec::from_slice(bytes),
        }
    }

    pub fn remote(step: StepIndex, bytes: &[u8]) -> Self {
        Self {
            step,
            origin: InputOrigin::Remote,
            bytes: SmallVec::from_slice(bytes),
        }
    }
}

/// Whether an input handed to the host was received or guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// Input received from its owner for exactly this step
    Confirmed,
    /// Newest earlier input reused because the real one has not arrived
    Predicted,
}

/// Inputs from one origin, keyed by step.
///
/// Storing a frame for a step that is already present replaces it, so a
/// host that re-submits inputs while re-simulating after a rollback never
/// produces duplicates.
#[derive(Debug, Default)]
pub struct InputBuffer {
    frames: BTreeMap<StepIndex, InputFrame>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, returning the frame it replaced (if any).
    pub fn insert(&mut self, frame: InputFrame) -> Option<InputFrame> {
        self.frames.insert(frame.step, frame)
    }

    pub fn get(&self, step: StepIndex) -> Option<&InputFrame> {
        self.frames.get(&step)
    }

    pub fn contains(&self, step: StepIndex) -> bool {
        self.frames.contains_key(&step)
    }

    /// Highest step with a stored frame.
    pub fn latest_step(&self) -> Option<StepIndex> {
        self.frames.keys().next_back().copied()
    }

    /// Frame for `step`, or the newest earlier frame as a prediction.
    pub fn get_or_predict(&self, step: StepIndex) -> Option<(&InputFrame, InputStatus)> {
        if let Some(frame) = self.frames.get(&step) {
            return Some((frame, InputStatus::Confirmed));
        }
        self.frames
            .range(..step)
            .next_back()
            .map(|(_, frame)| (frame, InputStatus::Predicted))
    }

    /// Frames with `step >= from`, in ascending order.
    pub fn since(&self, from: StepIndex) -> impl Iterator<Item = &InputFrame> {
        self.frames.range(from..).map(|(_, frame)| frame)
    }

    /// Drop every frame older than `step`. Returns how many were dropped.
    pub fn prune_before(&mut self, step: StepIndex) -> usize {
        let kept = self.frames.split_off(&step);
        let dropped = self.frames.len();
        self.frames = kept;
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_same_step() {
        let mut buffer = InputBuffer::new();
        assert!(buffer.insert(InputFrame::local(5, &[1])).is_none());
        let replaced = buffer.insert(InputFrame::local(5, &[2])).unwrap();
        assert_eq!(replaced.bytes.as_slice(), &[1]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(5).unwrap().bytes.as_slice(), &[2]);
    }

    #[test]
    fn test_latest_step_handles_negative_steps() {
        let mut buffer = InputBuffer::new();
        assert_eq!(buffer.latest_step(), None);
        buffer.insert(InputFrame::remote(-123, &[0]));
        buffer.insert(InputFrame::remote(-122, &[0]));
        assert_eq!(buffer.latest_step(), Some(-122));
    }

    #[test]
    fn test_get_or_predict() {
        let mut buffer = InputBuffer::new();
        assert!(buffer.get_or_predict(3).is_none());

        buffer.insert(InputFrame::remote(1, &[10]));
        buffer.insert(InputFrame::remote(2, &[20]));

        let (frame, status) = buffer.get_or_predict(2).unwrap();
        assert_eq!(status, InputStatus::Confirmed);
        assert_eq!(frame.bytes.as_slice(), &[20]);

        let (frame, status) = buffer.get_or_predict(6).unwrap();
        assert_eq!(status, InputStatus::Predicted);
        assert_eq!(frame.step, 2);
    }

    #[test]
    fn test_prune_before() {
        let mut buffer = InputBuffer::new();
        for step in 0..10 {
            buffer.insert(InputFrame::local(step, &[step as u8]));
        }
        assert_eq!(buffer.prune_before(4), 4);
        assert_eq!(buffer.len(), 6);
        assert!(!buffer.contains(3));
        assert!(buffer.contains(4));
        assert_eq!(buffer.since(8).count(), 2);
    }
}
