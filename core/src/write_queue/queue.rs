//! Bounded FIFO with one consumer thread

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::sink::WriteSink;
use super::{WriteMessage, WriteQueueError};
use crate::config::{OverflowPolicy, PersistenceConfig};

#[derive(Default)]
struct QueueState {
    messages: VecDeque<WriteMessage>,
    /// Worker is inside `WriteSink::write`
    busy: bool,
    closed: bool,
    dropped: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled on push and on close
    not_empty: Condvar,
    /// Signalled when a slot frees up
    not_full: Condvar,
    /// Signalled when the queue is empty and the worker is idle
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| {
            tracing::warn!("write queue mutex poisoned; continuing");
            e.into_inner()
        })
    }

    fn wait<'a>(&self, condvar: &Condvar, guard: MutexGuard<'a, QueueState>) -> MutexGuard<'a, QueueState> {
        condvar.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

/// Durable write queue.
///
/// Producers call [`WriteQueue::enqueue`] from any thread; a single worker
/// writes messages to the sink in enqueue order. Dropping the queue drains
/// what is left and joins the worker.
pub struct WriteQueue {
    shared: Arc<Shared>,
    capacity: usize,
    policy: OverflowPolicy,
    worker: Option<JoinHandle<()>>,
}

impl WriteQueue {
    pub fn new(
        sink: Box<dyn WriteSink>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Result<Self, WriteQueueError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("rollsync-writer".into())
            .spawn(move || run(&worker_shared, sink))
            .map_err(WriteQueueError::Spawn)?;

        Ok(Self {
            shared,
            capacity: capacity.max(1),
            policy,
            worker: Some(worker),
        })
    }

    pub fn from_config(
        config: &PersistenceConfig,
        sink: Box<dyn WriteSink>,
    ) -> Result<Self, WriteQueueError> {
        Self::new(sink, config.queue_capacity, config.overflow)
    }

    /// Queue a message.
    ///
    /// When full, `Block` waits for a free slot and `DropOldest` discards the
    /// oldest queued message. Fails once the queue is shut down.
    pub fn enqueue(&self, message: WriteMessage) -> Result<(), WriteQueueError> {
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(WriteQueueError::Closed);
            }
            if state.messages.len() < self.capacity {
                break;
            }
            match self.policy {
                OverflowPolicy::Block => {
                    state = self.shared.wait(&self.shared.not_full, state);
                }
                OverflowPolicy::DropOldest => {
                    if let Some(oldest) = state.messages.pop_front() {
                        state.dropped += 1;
                        tracing::warn!(
                            tag = %oldest.tag,
                            operation = ?oldest.operation,
                            "write queue full, dropped oldest message"
                        );
                    }
                }
            }
        }

        state.messages.push_back(message);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Drop queued writes for `tag` that the worker has not started.
    ///
    /// Returns the number of messages removed.
    pub fn discard_tagged(&self, tag: &str) -> usize {
        let mut state = self.shared.lock();
        let before = state.messages.len();
        state.messages.retain(|message| message.tag != tag);
        let removed = before - state.messages.len();
        if removed > 0 {
            tracing::debug!(%tag, removed, "discarded queued writes");
            self.shared.not_full.notify_all();
            if state.messages.is_empty() && !state.busy {
                self.shared.idle.notify_all();
            }
        }
        removed
    }

    /// Block until every queued message has been written.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        while !state.messages.is_empty() || state.busy {
            if self.worker.is_none() {
                break;
            }
            state = self.shared.wait(&self.shared.idle, state);
        }
    }

    /// Stop accepting messages, drain the rest, and join the worker.
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.shared.lock();
            state.closed = true;
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }
        if worker.join().is_err() {
            tracing::error!("write queue worker panicked");
        }
    }

    /// Messages waiting to be written.
    pub fn len(&self) -> usize {
        self.shared.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Messages discarded by the `DropOldest` policy.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, mut sink: Box<dyn WriteSink>) {
    tracing::debug!("write queue worker started");
    loop {
        let message = {
            let mut state = shared.lock();
            while state.messages.is_empty() && !state.closed {
                state = shared.wait(&shared.not_empty, state);
            }
            match state.messages.pop_front() {
                Some(message) => {
                    state.busy = true;
                    shared.not_full.notify_one();
                    message
                }
                None => break,
            }
        };

        if let Err(e) = sink.write(&message) {
            tracing::warn!(
                tag = %message.tag,
                operation = ?message.operation,
                error = %e,
                "write failed"
            );
        }

        let mut state = shared.lock();
        state.busy = false;
        if state.messages.is_empty() {
            shared.idle.notify_all();
        }
    }

    shared.idle.notify_all();
    tracing::debug!("write queue worker finished");
}
