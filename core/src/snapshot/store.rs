//! Step-keyed snapshot store

use std::collections::BTreeMap;

use super::buffer::Snapshot;
use super::pool::BufferPool;
use super::SnapshotError;
use crate::config::RollbackConfig;
use crate::step::StepIndex;

/// Active snapshots for the rollback window, backed by a recycling pool.
///
/// Capturing step `M` evicts every snapshot older than `M - window`, so a
/// snapshot captured at `N` stays restorable through the capture of
/// `N + window` and is gone after the capture of `N + window + 1`.
#[derive(Debug)]
pub struct SnapshotStore {
    pool: BufferPool,
    /// Snapshots keyed by the step they were captured for
    active: BTreeMap<StepIndex, Snapshot>,
    window: u32,
    evictions: u64,
}

impl SnapshotStore {
    pub fn new(snapshot_size: usize, max_pool_size: usize, window: u32) -> Self {
        Self {
            pool: BufferPool::new(snapshot_size, max_pool_size),
            active: BTreeMap::new(),
            window,
            evictions: 0,
        }
    }

    pub fn from_config(config: &RollbackConfig) -> Self {
        Self::new(config.snapshot_size, config.max_pool_size, config.window)
    }

    /// Check out a writable snapshot for `step`.
    ///
    /// Re-capturing a step that is already active hands back the same buffer.
    /// When every buffer is in use the oldest active snapshot is evicted.
    pub fn capture(&mut self, step: StepIndex) -> Result<&mut Snapshot, SnapshotError> {
        self.evict_older_than(step.saturating_sub(self.window as StepIndex));

        if !self.active.contains_key(&step) {
            let buffer = self.checkout()?;
            self.active.insert(step, Snapshot::from_buffer(buffer, step));
            tracing::trace!(step, active = self.active.len(), "captured snapshot");
        }

        self.active
            .get_mut(&step)
            .ok_or(SnapshotError::SnapshotNotFound { step })
    }

    /// Capture `state` for `step` and return its checksum.
    pub fn capture_bytes(&mut self, step: StepIndex, state: &[u8]) -> Result<u64, SnapshotError> {
        let snapshot = self.capture(step)?;
        snapshot.write(state);
        Ok(snapshot.checksum())
    }

    /// Read the snapshot captured for exactly `step`.
    pub fn restore(&self, step: StepIndex) -> Result<&Snapshot, SnapshotError> {
        self.active
            .get(&step)
            .ok_or(SnapshotError::SnapshotNotFound { step })
    }

    /// Return the snapshot for `step` to the pool. Releasing an unknown step
    /// is a no-op.
    pub fn release(&mut self, step: StepIndex) -> bool {
        match self.active.remove(&step) {
            Some(snapshot) => {
                self.pool.release(snapshot.into_buffer());
                true
            }
            None => false,
        }
    }

    /// Release every active snapshot. Returns how many were released.
    pub fn clear(&mut self) -> usize {
        let active = std::mem::take(&mut self.active);
        let count = active.len();
        for snapshot in active.into_values() {
            self.pool.release(snapshot.into_buffer());
        }
        count
    }

    pub fn contains(&self, step: StepIndex) -> bool {
        self.active.contains_key(&step)
    }

    /// Oldest restorable step.
    pub fn oldest_step(&self) -> Option<StepIndex> {
        self.active.keys().next().copied()
    }

    /// Newest captured step.
    pub fn newest_step(&self) -> Option<StepIndex> {
        self.active.keys().next_back().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    /// Total snapshots evicted to make room or to honor the window.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    fn checkout(&mut self) -> Result<Vec<u8>, SnapshotError> {
        if let Some(buffer) = self.pool.acquire() {
            return Ok(buffer);
        }
        if self.pool.max_buffers() == 0 {
            return Err(SnapshotError::PoolExhausted { capacity: 0 });
        }

        // Pool at capacity: recycle the oldest snapshot
        if let Some((oldest, snapshot)) = self.active.pop_first() {
            tracing::debug!(step = oldest, "snapshot pool full, evicting oldest");
            self.evictions += 1;
            self.pool.release(snapshot.into_buffer());
        }
        self.pool.acquire().ok_or(SnapshotError::PoolExhausted {
            capacity: self.pool.max_buffers(),
        })
    }

    fn evict_older_than(&mut self, cutoff: StepIndex) {
        let kept = self.active.split_off(&cutoff);
        let expired = std::mem::replace(&mut self.active, kept);
        for (step, snapshot) in expired {
            tracing::trace!(step, "snapshot left rollback window");
            self.evictions += 1;
            self.pool.release(snapshot.into_buffer());
        }
    }
}
