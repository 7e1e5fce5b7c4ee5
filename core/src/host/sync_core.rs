//! The `SyncCore` facade

use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;

use bitcode::{Decode, Encode};
use rollsync_shared::{ConnectCode, PlayerSelections, StageId};

use crate::config::SyncConfig;
use crate::diff::{DiffBytes, DiffError, DiffPipeline};
use crate::error::CoreError;
use crate::matchmaking::{
    MatchmakingService, NegotiationEvent, NegotiationState, SessionNegotiator,
};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::step::{InputFrame, InputStatus, StepIndex};
use crate::sync::{
    Session, StepResponse, SyncController, SyncError, SyncEvent, SyncState, TerminationReason,
};
use crate::write_queue::{
    ReplayFileSink, ReplayMetadata, ReplayRecord, WriteMessage, WriteQueue, WriteSink,
};

/// Everything the host can ask about the current session.
///
/// Sent to the host bitcode-encoded in response to the status command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct SessionStatus {
    pub negotiation: NegotiationState,
    pub sync: SyncState,
    pub local_port: Option<u8>,
    pub stage: Option<StageId>,
    pub seed: Option<u64>,
    pub remote: Option<PlayerSelections>,
    pub last_processed_step: Option<StepIndex>,
    pub latest_remote_step: Option<StepIndex>,
    pub stall_count: u32,
    pub total_stalled_steps: u64,
    pub connection_stalled: bool,
    pub last_ffw_step: Option<StepIndex>,
    pub ffw_steps: u64,
    pub mispredictions: u64,
    /// Last negotiation failure or termination reason
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::decode(bytes)
    }
}

/// Who the host is logged in as and where matchmaking stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct OnlineStatus {
    /// `None` when logged out
    pub connect_code: Option<ConnectCode>,
    pub negotiation: NegotiationState,
}

impl OnlineStatus {
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::decode(bytes)
    }
}

/// What a [`SyncCore::cleanup`] call released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub session_ended: bool,
    pub negotiation_cancelled: bool,
    pub snapshots_released: usize,
    pub diffs_discarded: usize,
    pub writes_discarded: usize,
}

/// Result of a [`SyncCore::request_restore`] running on a worker thread.
pub struct RestoreHandle {
    step: StepIndex,
    receiver: mpsc::Receiver<Result<Vec<u8>, SnapshotError>>,
}

impl RestoreHandle {
    pub fn step(&self) -> StepIndex {
        self.step
    }

    /// The restored state once the worker is done, `None` before.
    pub fn try_take(&self) -> Option<Result<Vec<u8>, SnapshotError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                Some(Err(SnapshotError::SnapshotNotFound { step: self.step }))
            }
        }
    }

    /// Block until the worker is done.
    pub fn wait(self) -> Result<Vec<u8>, SnapshotError> {
        self.receiver
            .recv()
            .unwrap_or(Err(SnapshotError::SnapshotNotFound { step: self.step }))
    }
}

/// Wires the snapshot store, diff pipeline, sync controller, negotiator and
/// write queue together behind the operations a host needs.
///
/// Driven from one thread. Background work (diffs, replay writes, restore
/// requests) runs on threads owned by the components.
pub struct SyncCore {
    config: SyncConfig,
    snapshots: Arc<Mutex<SnapshotStore>>,
    diffs: DiffPipeline,
    /// State that checkpoints are diffed against
    reference: Option<DiffBytes>,
    controller: SyncController,
    negotiator: SessionNegotiator,
    writer: Option<WriteQueue>,
    /// Write-queue tag of the live session's replay
    replay_tag: Option<String>,
    last_checkpoint: Option<StepIndex>,
    last_error: Option<String>,
    events: Vec<SyncEvent>,
}

impl SyncCore {
    /// Build a core that writes replays into the configured replay
    /// directory when persistence is enabled.
    pub fn new(config: SyncConfig, service: Box<dyn MatchmakingService>) -> Result<Self, CoreError> {
        let sink: Option<Box<dyn WriteSink>> = if config.persistence.enabled {
            match config.persistence.resolved_replay_dir() {
                Some(dir) => Some(Box::new(ReplayFileSink::new(dir)?)),
                None => {
                    tracing::warn!("no replay directory available, replays disabled");
                    None
                }
            }
        } else {
            None
        };
        Self::with_sink(config, service, sink)
    }

    /// Build a core with an explicit replay sink, or none.
    pub fn with_sink(
        config: SyncConfig,
        service: Box<dyn MatchmakingService>,
        sink: Option<Box<dyn WriteSink>>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let writer = sink
            .map(|sink| WriteQueue::from_config(&config.persistence, sink))
            .transpose()?;

        Ok(Self {
            snapshots: Arc::new(Mutex::new(SnapshotStore::from_config(&config.rollback))),
            diffs: DiffPipeline::new(&config.diff)?,
            reference: None,
            controller: SyncController::from_config(&config),
            negotiator: SessionNegotiator::new(service, &config.matchmaking),
            writer,
            replay_tag: None,
            last_checkpoint: None,
            last_error: None,
            events: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    // ---- Negotiation ----

    /// Start looking for an opponent.
    pub fn begin_search(&mut self, selections: PlayerSelections) -> Result<(), CoreError> {
        if self.controller.state().is_active() {
            return Err(SyncError::SessionActive.into());
        }
        self.last_error = None;
        self.negotiator
            .start_search(selections)
            .map_err(|e| self.record_error(e))
    }

    pub fn set_selections(&mut self, update: &PlayerSelections) -> Result<(), CoreError> {
        self.negotiator
            .set_selections(update)
            .map_err(|e| self.record_error(e))
    }

    /// Advance matchmaking. On `Connected` the session is attached to the
    /// controller and its replay is opened.
    pub fn poll_matchmaking(&mut self) -> Result<NegotiationEvent, CoreError> {
        let event = self.negotiator.poll().map_err(|e| self.record_error(e))?;
        if event == NegotiationEvent::Connected {
            if let Some(session) = self.negotiator.take_session() {
                self.attach_session(session)?;
            }
        }
        Ok(event)
    }

    /// Hand a session negotiated elsewhere to the controller.
    pub fn attach_session(&mut self, session: Session) -> Result<(), CoreError> {
        let tag = session.tag();
        self.controller.set_record_confirmed(self.writer.is_some());
        self.controller.begin(session)?;
        self.last_checkpoint = None;
        self.reference = None;

        if let Some(writer) = &self.writer {
            match writer.enqueue(WriteMessage::create(tag.clone())) {
                Ok(()) => self.replay_tag = Some(tag),
                Err(e) => tracing::warn!(%tag, error = %e, "failed to open replay"),
            }
        }
        Ok(())
    }

    // ---- Per-step ----

    /// Submit local input for `step` and get the host's next move.
    pub fn submit_input(&mut self, step: StepIndex, input: &[u8]) -> StepResponse {
        let response = self.controller.handle_step(step, input);

        for confirmed in self.controller.drain_confirmed() {
            self.append_record(ReplayRecord::Inputs {
                step: confirmed.step,
                local: confirmed.local.to_vec(),
                remote: confirmed.remote.to_vec(),
            });
        }
        self.maybe_checkpoint();
        self.pump_diffs();

        let mut terminated = None;
        for event in self.controller.drain_events() {
            if let SyncEvent::Terminated { reason } = event {
                terminated = Some(reason);
            }
            self.events.push(event);
        }
        if let Some(reason) = terminated {
            let session = self.controller.take_session();
            self.finish_session(reason, session);
        }
        response
    }

    /// Whether the host should capture a snapshot at `step`.
    pub fn should_capture(&self, step: StepIndex) -> bool {
        self.controller.should_capture(step)
    }

    /// Store the simulation state for `step`. Returns its checksum.
    ///
    /// The first state captured in a session becomes the reference that
    /// replay checkpoints are diffed against.
    pub fn capture_state(&mut self, step: StepIndex, state: &[u8]) -> Result<u64, CoreError> {
        let checksum = self.lock_snapshots().capture_bytes(step, state)?;
        if self.reference.is_none() {
            self.set_reference_state(state);
        }
        Ok(checksum)
    }

    /// Replace the state that checkpoints are diffed against.
    pub fn set_reference_state(&mut self, state: &[u8]) {
        self.reference = Some(DiffBytes::from(state));
    }

    /// Copy of the state captured at `step`.
    pub fn restore_state(&self, step: StepIndex) -> Result<Vec<u8>, CoreError> {
        Ok(restore_copy(&self.snapshots, step)?)
    }

    /// Copy the state at `step` on a worker thread.
    pub fn request_restore(&self, step: StepIndex) -> RestoreHandle {
        let (tx, receiver) = mpsc::channel();
        let fallback = tx.clone();
        let store = Arc::clone(&self.snapshots);

        let spawned = thread::Builder::new()
            .name("rollsync-restore".into())
            .spawn(move || {
                let _ = tx.send(restore_copy(&store, step));
            });
        if let Err(e) = spawned {
            tracing::warn!(step, error = %e, "restore worker failed to start, restoring inline");
            let _ = fallback.send(restore_copy(&self.snapshots, step));
        }
        RestoreHandle { step, receiver }
    }

    /// Remote input for `step`, or a prediction.
    pub fn remote_input_or_prediction(&mut self, step: StepIndex) -> Option<(InputFrame, InputStatus)> {
        self.controller.remote_input_or_prediction(step)
    }

    /// Persist finished checkpoint diffs. Returns how many were queued.
    pub fn pump_diffs(&mut self) -> usize {
        let finished = self.diffs.take_finished();
        self.write_checkpoints(finished)
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn status(&self) -> SessionStatus {
        let session = self.controller.session();
        let stats = self.controller.stats();
        SessionStatus {
            negotiation: self.negotiator.state(),
            sync: self.controller.state(),
            local_port: session.map(|s| s.local_port),
            stage: session.map(|s| s.stage),
            seed: session.map(|s| s.seed),
            remote: session.map(|s| s.remote.clone()),
            last_processed_step: stats.and_then(|s| s.last_processed_step),
            latest_remote_step: self.controller.latest_remote_step(),
            stall_count: stats.map_or(0, |s| s.stall_count),
            total_stalled_steps: stats.map_or(0, |s| s.total_stalled_steps),
            connection_stalled: self.controller.is_connection_stalled(),
            last_ffw_step: stats.and_then(|s| s.last_ffw_step),
            ffw_steps: stats.map_or(0, |s| s.ffw_steps),
            mispredictions: stats.map_or(0, |s| s.mispredictions),
            last_error: self.last_error.clone(),
        }
    }

    pub fn online_status(&self) -> OnlineStatus {
        OnlineStatus {
            connect_code: self.negotiator.local_selections().connect_code.clone(),
            negotiation: self.negotiator.state(),
        }
    }

    // ---- Teardown ----

    /// End the live session as a local quit, finishing its replay.
    ///
    /// Returns `false` when no session was running.
    pub fn end_session(&mut self) -> bool {
        if !self.controller.state().is_active() {
            return false;
        }
        let session = self.controller.terminate(TerminationReason::LocalQuit);
        self.events.extend(self.controller.drain_events());
        self.finish_session(TerminationReason::LocalQuit, session);
        true
    }

    /// Abort everything: search, session, in-flight diffs, queued replay
    /// writes, and snapshots.
    ///
    /// Returns `None` when there was nothing to clean up, so repeated calls
    /// are harmless.
    pub fn cleanup(&mut self) -> Option<CleanupReport> {
        let session = self.controller.reset();
        let negotiation_cancelled = self.negotiator.cleanup();
        let diffs_discarded = self.diffs.discard_all();
        let snapshots_released = self.lock_snapshots().clear();
        let writes_discarded = match (&self.writer, &self.replay_tag) {
            (Some(writer), Some(tag)) => writer.discard_tagged(tag),
            _ => 0,
        };
        let session_ended = session.is_some();
        self.abort_replay();
        self.reference = None;
        self.last_checkpoint = None;
        self.events.clear();

        let report = CleanupReport {
            session_ended,
            negotiation_cancelled,
            snapshots_released,
            diffs_discarded,
            writes_discarded,
        };
        if report == CleanupReport::default() {
            return None;
        }
        tracing::info!(?report, "cleaned up");
        Some(report)
    }

    /// Clean up, then forget the local connect code and selections.
    pub fn logout(&mut self) -> Option<CleanupReport> {
        let report = self.cleanup();
        self.negotiator.logout();
        self.last_error = None;
        report
    }

    /// Block until queued replay writes are on disk.
    pub fn flush_writes(&self) {
        if let Some(writer) = &self.writer {
            writer.flush();
        }
    }

    fn finish_session(&mut self, reason: TerminationReason, session: Option<Session>) {
        tracing::info!(%reason, "session ended");
        if reason != TerminationReason::LocalQuit {
            self.last_error = Some(reason.to_string());
        }
        self.negotiator.notify_connection_lost();

        let finished = self.diffs.wait_all();
        self.write_checkpoints(finished);
        self.close_replay(session.as_ref());

        let released = self.lock_snapshots().clear();
        tracing::debug!(released, "snapshots released");
        self.reference = None;
        self.last_checkpoint = None;
    }

    /// Diff the newest confirmed snapshot once the checkpoint interval has
    /// passed.
    fn maybe_checkpoint(&mut self) {
        let interval = self.config.diff.checkpoint_interval as StepIndex;
        if interval <= 0 || self.replay_tag.is_none() {
            return;
        }
        let Some(reference) = self.reference.clone() else {
            return;
        };
        let Some(confirmed) = self.controller.stats().and_then(|s| s.last_processed_step) else {
            return;
        };
        if self.last_checkpoint.is_some_and(|last| confirmed < last + interval) {
            return;
        }

        let target = match self.lock_snapshots().restore(confirmed) {
            Ok(snapshot) => snapshot.data().to_vec(),
            Err(_) => return,
        };
        self.diffs.submit(confirmed, reference, target);
        self.last_checkpoint = Some(confirmed);
        tracing::trace!(step = confirmed, "checkpoint diff submitted");
    }

    fn write_checkpoints(&self, finished: Vec<(StepIndex, Result<DiffBytes, DiffError>)>) -> usize {
        let mut written = 0;
        for (step, result) in finished {
            match result {
                Ok(diff) => {
                    let record = ReplayRecord::Checkpoint {
                        step,
                        diff: diff.to_vec(),
                    };
                    if self.append_record(record) {
                        written += 1;
                    }
                }
                Err(e) => tracing::warn!(step, error = %e, "checkpoint dropped"),
            }
        }
        written
    }

    fn append_record(&self, record: ReplayRecord) -> bool {
        let (Some(writer), Some(tag)) = (&self.writer, &self.replay_tag) else {
            return false;
        };
        let result = WriteMessage::append(tag.as_str(), &record)
            .map_err(CoreError::from)
            .and_then(|message| writer.enqueue(message).map_err(CoreError::from));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%tag, step = record.step(), error = %e, "replay write dropped");
                false
            }
        }
    }

    fn close_replay(&mut self, session: Option<&Session>) {
        let Some(tag) = self.replay_tag.take() else {
            return;
        };
        let (Some(writer), Some(session)) = (&self.writer, session) else {
            return;
        };
        let result = WriteMessage::close(tag.as_str(), ReplayMetadata::from_session(session))
            .map_err(CoreError::from)
            .and_then(|message| writer.enqueue(message).map_err(CoreError::from));
        if let Err(e) = result {
            tracing::warn!(%tag, error = %e, "failed to close replay");
        }
    }

    /// Drop the session's unfinished replay instead of closing it.
    fn abort_replay(&mut self) {
        let Some(tag) = self.replay_tag.take() else {
            return;
        };
        let Some(writer) = &self.writer else {
            return;
        };
        if let Err(e) = writer.enqueue(WriteMessage::abort(tag.as_str())) {
            tracing::warn!(%tag, error = %e, "failed to abort replay");
        }
    }

    fn record_error(&mut self, error: impl Into<CoreError>) -> CoreError {
        let error = error.into();
        self.last_error = Some(error.to_string());
        error
    }

    fn lock_snapshots(&self) -> MutexGuard<'_, SnapshotStore> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncCore {
    fn drop(&mut self) {
        self.end_session();
    }
}

fn restore_copy(store: &Mutex<SnapshotStore>, step: StepIndex) -> Result<Vec<u8>, SnapshotError> {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    store.restore(step).map(|snapshot| snapshot.data().to_vec())
}
