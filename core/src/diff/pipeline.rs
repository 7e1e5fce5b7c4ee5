//! Background diff computation keyed by step

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;
use tokio::sync::watch;

use super::codec::{DeltaCodec, XorLz4Codec};
use super::DiffError;
use crate::config::DiffConfig;
use crate::step::StepIndex;

/// Finished diff bytes.
pub type DiffBytes = Arc<[u8]>;

type Outcome = Option<Result<DiffBytes, DiffError>>;

/// Handle to one background diff.
///
/// Many handles may await the same task; the result is produced once.
#[derive(Debug, Clone)]
pub struct DiffTask {
    step: StepIndex,
    receiver: watch::Receiver<Outcome>,
}

impl DiffTask {
    pub fn step(&self) -> StepIndex {
        self.step
    }

    /// The result if the task has finished, `None` while in flight.
    pub fn try_result(&self) -> Option<Result<DiffBytes, DiffError>> {
        self.receiver.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait for the task to finish.
    pub async fn wait(mut self) -> Result<DiffBytes, DiffError> {
        let step = self.step;
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or(Err(DiffError::Cancelled { step })),
            Err(_) => Err(DiffError::Cancelled { step }),
        }
    }
}

struct Entry {
    sender: Arc<watch::Sender<Outcome>>,
    task: DiffTask,
}

/// Computes diffs of snapshots against a reference state off the step thread.
///
/// At most one task exists per step: submitting a step that already has a
/// task returns that task. Tasks may finish in any order.
pub struct DiffPipeline {
    runtime: Runtime,
    codec: Arc<dyn DeltaCodec>,
    tasks: Mutex<HashMap<StepIndex, Entry>>,
}

impl DiffPipeline {
    /// Create a pipeline with the default XOR + LZ4 codec.
    pub fn new(config: &DiffConfig) -> std::io::Result<Self> {
        Self::with_codec(config, Arc::new(XorLz4Codec))
    }

    pub fn with_codec(config: &DiffConfig, codec: Arc<dyn DeltaCodec>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.workers.max(1))
            .thread_name("rollsync-diff")
            .build()?;
        Ok(Self {
            runtime,
            codec,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Start diffing `target` against `reference` for `step`.
    ///
    /// Returns immediately. If a task for `step` already exists it is
    /// returned and no new work is started.
    pub fn submit(&self, step: StepIndex, reference: DiffBytes, target: Vec<u8>) -> DiffTask {
        let mut tasks = self.lock();
        if let Some(entry) = tasks.get(&step) {
            tracing::trace!(step, "diff already submitted");
            return entry.task.clone();
        }

        let (sender, receiver) = watch::channel(None);
        let sender = Arc::new(sender);
        let task = DiffTask { step, receiver };
        tasks.insert(
            step,
            Entry {
                sender: Arc::clone(&sender),
                task: task.clone(),
            },
        );
        drop(tasks);

        let codec = Arc::clone(&self.codec);
        self.runtime.spawn_blocking(move || {
            // Discarded before we started
            if sender.borrow().is_some() {
                return;
            }
            let outcome = codec
                .encode(&reference, &target)
                .map(DiffBytes::from)
                .map_err(|e| DiffError::Failed {
                    step,
                    reason: e.to_string(),
                });
            if let Err(e) = &outcome {
                tracing::warn!(step, error = %e, "diff failed");
            }
            publish(&sender, outcome);
        });

        task
    }

    /// Handle for the task at `step`, if one exists.
    pub fn task(&self, step: StepIndex) -> Option<DiffTask> {
        self.lock().get(&step).map(|entry| entry.task.clone())
    }

    /// Block the calling thread until the diff for `step` is ready.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(&self, step: StepIndex) -> Result<DiffBytes, DiffError> {
        let task = self.task(step).ok_or(DiffError::NotSubmitted { step })?;
        self.runtime.block_on(task.wait())
    }

    /// Await the diff for `step`.
    pub async fn wait_async(&self, step: StepIndex) -> Result<DiffBytes, DiffError> {
        let task = self.task(step).ok_or(DiffError::NotSubmitted { step })?;
        task.wait().await
    }

    /// Non-blocking poll. `None` while the task is in flight.
    pub fn try_result(&self, step: StepIndex) -> Option<Result<DiffBytes, DiffError>> {
        match self.task(step) {
            Some(task) => task.try_result(),
            None => Some(Err(DiffError::NotSubmitted { step })),
        }
    }

    /// Drop the task for `step`. Awaiters of an unfinished task see
    /// [`DiffError::Cancelled`].
    pub fn discard(&self, step: StepIndex) -> bool {
        match self.lock().remove(&step) {
            Some(entry) => {
                publish(&entry.sender, Err(DiffError::Cancelled { step }));
                true
            }
            None => false,
        }
    }

    /// Drop every task. Returns how many were dropped.
    pub fn discard_all(&self) -> usize {
        let drained: Vec<(StepIndex, Entry)> = self.lock().drain().collect();
        for (step, entry) in &drained {
            publish(&entry.sender, Err(DiffError::Cancelled { step: *step }));
        }
        drained.len()
    }

    /// Remove and return every finished task, in step order.
    pub fn take_finished(&self) -> Vec<(StepIndex, Result<DiffBytes, DiffError>)> {
        let mut tasks = self.lock();
        let finished: Vec<StepIndex> = tasks
            .iter()
            .filter(|(_, entry)| entry.task.is_finished())
            .map(|(step, _)| *step)
            .collect();

        let mut results: Vec<_> = finished
            .into_iter()
            .filter_map(|step| {
                let entry = tasks.remove(&step)?;
                entry.task.try_result().map(|result| (step, result))
            })
            .collect();
        results.sort_by_key(|(step, _)| *step);
        results
    }

    /// Block until every outstanding task is done, then take them all in
    /// step order.
    ///
    /// Must not be called from inside an async context.
    pub fn wait_all(&self) -> Vec<(StepIndex, Result<DiffBytes, DiffError>)> {
        let pending: Vec<DiffTask> = self
            .lock()
            .values()
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| entry.task.clone())
            .collect();
        for task in pending {
            let _ = self.runtime.block_on(task.wait());
        }
        self.take_finished()
    }

    /// Tasks submitted and not yet discarded or taken.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<StepIndex, Entry>> {
        // A panic while holding the lock leaves the map consistent
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Set the outcome unless one was already published.
fn publish(sender: &watch::Sender<Outcome>, outcome: Result<DiffBytes, DiffError>) {
    sender.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(outcome);
        true
    });
}
