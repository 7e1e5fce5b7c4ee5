//! Recycling buffer pool

/// Free list of state buffers.
///
/// Avoids allocations in the hot path: every capture reuses a buffer that a
/// previous, now evicted, snapshot was written into. Buffers are allocated
/// lazily and the pool never hands out more than `max_buffers` at once.
#[derive(Debug)]
pub struct BufferPool {
    /// Buffers ready for reuse
    free: Vec<Vec<u8>>,
    /// Capacity each buffer is allocated with
    buffer_size: usize,
    /// Upper bound on buffers in existence (free + checked out)
    max_buffers: usize,
    /// Buffers currently checked out
    outstanding: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            free: Vec::new(),
            buffer_size,
            max_buffers,
            outstanding: 0,
        }
    }

    /// Take a buffer from the free list, or allocate one if under the cap.
    ///
    /// Returns `None` when every allowed buffer is checked out.
    pub fn acquire(&mut self) -> Option<Vec<u8>> {
        let buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None if self.outstanding < self.max_buffers => {
                tracing::trace!(
                    buffer_size = self.buffer_size,
                    allocated = self.outstanding + 1,
                    "allocating snapshot buffer"
                );
                Vec::with_capacity(self.buffer_size)
            }
            None => return None,
        };
        self.outstanding += 1;
        Some(buffer)
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is cleared but retains its capacity for reuse. Buffers that
    /// grew past twice the configured size are dropped instead.
    pub fn release(&mut self, mut buffer: Vec<u8>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        buffer.clear();
        if buffer.capacity() <= self.buffer_size.saturating_mul(2) {
            self.free.push(buffer);
        } else {
            tracing::debug!(
                capacity = buffer.capacity(),
                "dropping oversized snapshot buffer"
            );
        }
    }

    /// Buffers ready for reuse without allocating.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    pub fn is_at_capacity(&self) -> bool {
        self.free.is_empty() && self.outstanding >= self.max_buffers
    }
}
