//! Per-step synchronization control loop

use crate::config::{SyncConfig, SyncThresholds};
use crate::net::{GoodbyeReason, LinkStatus, PeerMessage};
use crate::step::{InputFrame, InputStatus, StepIndex};

use super::SyncError;
use super::input::{ConfirmedStep, InputExchange};
use super::session::{Session, SessionStats};
use super::types::{FfwIntensity, StepResponse, SyncEvent, SyncState, TerminationReason};

/// Most local frames resent in one input packet
const MAX_PACKET_FRAMES: usize = 128;

/// Decides, once per host step, whether to continue, wait, or fast-forward.
///
/// The host calls [`SyncController::handle_step`] with its local input for
/// every step it wants to simulate. A `Wait` response means the host must
/// not advance and should call again with the same step.
pub struct SyncController {
    thresholds: SyncThresholds,
    window: u32,
    state: SyncState,
    session: Option<Session>,
    inputs: InputExchange,
    /// Step of the first local input of the session
    first_step: Option<StepIndex>,
    events: Vec<SyncEvent>,
    /// Collect confirmed steps for replay recording
    record_confirmed: bool,
    confirmed: Vec<ConfirmedStep>,
}

impl SyncController {
    pub fn new(thresholds: SyncThresholds, window: u32) -> Self {
        Self {
            thresholds,
            window,
            state: SyncState::Idle,
            session: None,
            inputs: InputExchange::new(MAX_PACKET_FRAMES),
            first_step: None,
            events: Vec::new(),
            record_confirmed: false,
            confirmed: Vec::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.sync.clone(), config.rollback.window)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> Option<&SessionStats> {
        self.session.as_ref().map(|session| &session.stats)
    }

    /// Whether the stall counter has passed the threshold this session.
    pub fn is_connection_stalled(&self) -> bool {
        self.stats().is_some_and(|stats| stats.connection_stalled)
    }

    pub fn latest_remote_step(&self) -> Option<StepIndex> {
        self.inputs.latest_remote()
    }

    /// Keep every newly confirmed step for [`SyncController::drain_confirmed`].
    pub fn set_record_confirmed(&mut self, record: bool) {
        self.record_confirmed = record;
        if !record {
            self.confirmed.clear();
        }
    }

    /// Attach a negotiated session.
    pub fn begin(&mut self, session: Session) -> Result<(), SyncError> {
        if self.state.is_active() {
            return Err(SyncError::SessionActive);
        }
        if let Some(mut stale) = self.session.take() {
            stale.link.close();
        }

        tracing::info!(
            session = session.id,
            local_port = session.local_port,
            stage = %session.stage,
            "sync session attached"
        );
        self.inputs.clear();
        self.first_step = None;
        self.confirmed.clear();
        self.session = Some(session);
        self.state = SyncState::AwaitingLocalReady;
        Ok(())
    }

    /// Record local input for `step` and decide what the host does next.
    pub fn handle_step(&mut self, step: StepIndex, local_input: &[u8]) -> StepResponse {
        if !self.state.is_active() {
            return StepResponse::Terminate;
        }

        if let Some(reason) = self.pump_link() {
            self.end(reason);
            return StepResponse::Terminate;
        }

        if self.state == SyncState::AwaitingLocalReady {
            self.state = SyncState::Running;
            self.first_step = Some(step);
            if let Some(session) = self.session.as_mut() {
                session.stats.first_step = Some(step);
            }
            self.events.push(SyncEvent::Started { step });
            tracing::info!(step, "first local input, session running");
        }

        let packet = self.inputs.record_local(step, local_input);
        let sent = match self.session.as_mut() {
            Some(session) => session.link.send(&PeerMessage::Input(packet)),
            None => Ok(()),
        };
        if let Err(e) = sent {
            tracing::warn!(step, error = %e, "failed to send local input");
            self.end(TerminationReason::SendFailed);
            return StepResponse::Terminate;
        }

        self.advance_confirmed();

        if self.local_lead(step) > self.thresholds.prediction_window as StepIndex {
            return self.stall(step);
        }
        if self.state == SyncState::Stalling {
            self.resume(step);
        }

        self.fast_forward_decision(step)
    }

    /// Whether the host should capture a snapshot at `step`.
    ///
    /// True while `step` is within the rollback window of the last confirmed
    /// step, so any speculative step can still be rolled back.
    pub fn should_capture(&self, step: StepIndex) -> bool {
        if !self.state.is_active() {
            return false;
        }
        match self.stats().and_then(|stats| stats.last_processed_step) {
            Some(confirmed) => step - confirmed <= self.window as StepIndex,
            None => true,
        }
    }

    /// Remote input for `step`, or the newest earlier one flagged as a
    /// prediction.
    pub fn remote_input_or_prediction(&mut self, step: StepIndex) -> Option<(InputFrame, InputStatus)> {
        self.inputs.remote_or_predict(step)
    }

    /// Remote frames from `from` onward.
    pub fn remote_frames_from(&self, from: StepIndex) -> Vec<InputFrame> {
        self.inputs.remote_since(from).cloned().collect()
    }

    /// End the session and hand it back for cleanup.
    ///
    /// Sends a goodbye when the host is the one quitting. Returns `None` when
    /// there was no session.
    pub fn terminate(&mut self, reason: TerminationReason) -> Option<Session> {
        if self.state.is_active() {
            self.end(reason);
        }
        self.session.take()
    }

    /// Detach the session after a termination the controller noticed itself.
    pub fn take_session(&mut self) -> Option<Session> {
        if self.state.is_active() {
            return None;
        }
        self.session.take()
    }

    /// Drop all session state and return to idle.
    pub fn reset(&mut self) -> Option<Session> {
        let session = self.terminate(TerminationReason::LocalQuit);
        self.inputs.clear();
        self.first_step = None;
        self.confirmed.clear();
        self.state = SyncState::Idle;
        session
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Steps confirmed since the last call, in order.
    pub fn drain_confirmed(&mut self) -> Vec<ConfirmedStep> {
        std::mem::take(&mut self.confirmed)
    }

    /// Apply everything the peer sent since the last step.
    fn pump_link(&mut self) -> Option<TerminationReason> {
        let session = self.session.as_mut()?;
        let mut messages = std::mem::take(&mut session.pending);
        messages.extend(session.link.poll());

        let mut goodbye = None;
        for message in messages {
            match message {
                PeerMessage::Input(packet) => {
                    self.inputs.receive_remote(&packet);
                }
                PeerMessage::Goodbye(reason) => goodbye = Some(reason),
                PeerMessage::Selections(_) => {
                    tracing::trace!("ignoring late selections");
                }
            }
        }

        if let Some(step) = self.inputs.take_mispredicted() {
            session.stats.mispredictions += 1;
            self.events.push(SyncEvent::Mispredicted { step });
            tracing::debug!(step, "remote input differs from prediction");
        }

        if let Some(reason) = goodbye {
            return Some(TerminationReason::PeerGoodbye(reason));
        }
        if session.link.status() == LinkStatus::Disconnected {
            return Some(TerminationReason::LinkLost);
        }
        None
    }

    fn advance_confirmed(&mut self) {
        let Some(confirmed) = self.inputs.confirmed_step() else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.stats.last_processed_step;
        if previous.is_some_and(|p| p >= confirmed) {
            return;
        }
        session.stats.last_processed_step = Some(confirmed);

        if self.record_confirmed {
            let from = previous.map_or(self.first_step.unwrap_or(confirmed), |p| p + 1);
            self.confirmed
                .extend((from..=confirmed).filter_map(|step| self.inputs.confirmed(step)));
        }
        self.inputs
            .prune_before(confirmed.saturating_sub(self.window as StepIndex));
    }

    /// How far the local side is ahead of the newest remote input with no
    /// gaps before it.
    fn local_lead(&self, step: StepIndex) -> StepIndex {
        match self.inputs.remote_frontier() {
            Some(remote) => step - remote,
            None => step - self.first_step.unwrap_or(step) + 1,
        }
    }

    fn stall(&mut self, step: StepIndex) -> StepResponse {
        let threshold = self.thresholds.stall_threshold;
        let Some(session) = self.session.as_mut() else {
            return StepResponse::Terminate;
        };
        let stats = &mut session.stats;
        stats.stall_count += 1;
        stats.total_stalled_steps += 1;

        if self.state != SyncState::Stalling {
            self.state = SyncState::Stalling;
            self.events.push(SyncEvent::Stalled { step });
            tracing::debug!(step, "waiting for remote input");
        }

        if stats.stall_count > threshold && !stats.connection_stalled {
            stats.connection_stalled = true;
            self.events.push(SyncEvent::ConnectionStalled {
                step,
                stalled_steps: stats.stall_count,
            });
            tracing::warn!(step, stalled_steps = stats.stall_count, "connection stalled");
        }
        StepResponse::Wait
    }

    fn resume(&mut self, step: StepIndex) {
        let stalled_steps = self
            .session
            .as_mut()
            .map(|session| std::mem::take(&mut session.stats.stall_count))
            .unwrap_or(0);
        self.state = SyncState::Running;
        self.events.push(SyncEvent::Resumed {
            step,
            stalled_steps,
        });
        tracing::debug!(step, stalled_steps, "remote input caught up");
    }

    fn fast_forward_decision(&mut self, step: StepIndex) -> StepResponse {
        let Some(latest_remote) = self.inputs.latest_remote() else {
            return StepResponse::Continue;
        };
        let intensity = FfwIntensity::for_lag(latest_remote - step, &self.thresholds);

        if self.state == SyncState::FastForwarding {
            if step >= latest_remote {
                self.state = SyncState::Running;
                self.events.push(SyncEvent::FastForwardEnded { step });
                tracing::debug!(step, "caught up with remote");
                return StepResponse::Continue;
            }
            return self.record_fast_forward(step, intensity.unwrap_or(FfwIntensity::Soft));
        }

        match intensity {
            Some(intensity) => {
                self.state = SyncState::FastForwarding;
                self.events
                    .push(SyncEvent::FastForwardStarted { step, intensity });
                tracing::debug!(step, latest_remote, ?intensity, "falling behind, fast-forwarding");
                self.record_fast_forward(step, intensity)
            }
            None => StepResponse::Continue,
        }
    }

    fn record_fast_forward(&mut self, step: StepIndex, intensity: FfwIntensity) -> StepResponse {
        if let Some(session) = self.session.as_mut() {
            session.stats.last_ffw_step = Some(step);
            session.stats.ffw_steps += 1;
        }
        StepResponse::FastForward(intensity)
    }

    /// Close the link and move to `Terminated`. The session stays attached
    /// until taken.
    fn end(&mut self, reason: TerminationReason) {
        if let Some(session) = self.session.as_mut() {
            if reason == TerminationReason::LocalQuit {
                if let Err(e) = session.link.send(&PeerMessage::Goodbye(GoodbyeReason::Quit)) {
                    tracing::debug!(error = %e, "goodbye not delivered");
                }
            }
            session.link.close();
            tracing::info!(session = session.id, %reason, "sync session terminated");
        }
        self.state = SyncState::Terminated;
        self.events.push(SyncEvent::Terminated { reason });
    }
}
