//! Snapshot buffers

use crate::step::StepIndex;

/// Full simulation state for one step.
///
/// The buffer is opaque to the store. `checksum` is an xxHash3 digest of the
/// contents for desync diagnostics; it is refreshed by [`Snapshot::write`]
/// and [`Snapshot::seal`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) data: Vec<u8>,
    pub(crate) checksum: u64,
    pub(crate) step: StepIndex,
}

impl Snapshot {
    pub(crate) fn from_buffer(buffer: Vec<u8>, step: StepIndex) -> Self {
        Self {
            data: buffer,
            checksum: 0,
            step,
        }
    }

    /// Step this snapshot was captured for.
    pub fn step(&self) -> StepIndex {
        self.step
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Writable access to the raw buffer.
    ///
    /// Call [`Snapshot::seal`] afterwards so the checksum matches.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Replace the contents with `state` and refresh the checksum.
    pub fn write(&mut self, state: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(state);
        self.seal();
    }

    /// Recompute the checksum after writing through [`Snapshot::data_mut`].
    pub fn seal(&mut self) {
        self.checksum = xxhash_rust::xxh3::xxh3_64(&self.data);
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.data
    }
}
