//! Session negotiation state machine
//!
//! Drives a search through the matchmaking service, opens the peer link,
//! exchanges selections, and builds the [`Session`] both peers agree on.

use std::time::{Duration, Instant};

use rollsync_shared::{PlayerSelections, SelectionMismatch};

use super::service::MatchmakingService;
use super::stage::resolve_stage;
use super::types::{
    NegotiationError, NegotiationEvent, NegotiationState, OpponentInfo, SearchPoll, ServiceError,
};
use crate::config::MatchmakingConfig;
use crate::net::{GoodbyeReason, LinkError, LinkStatus, PeerLink, PeerMessage};
use crate::sync::Session;

/// Client-side negotiation of one session at a time.
pub struct SessionNegotiator {
    state: NegotiationState,
    service: Box<dyn MatchmakingService>,
    search_timeout: Duration,
    /// Our selections, merged from every `set_selections` call
    local: PlayerSelections,
    opponent: Option<OpponentInfo>,
    link: Option<Box<dyn PeerLink>>,
    /// Messages that arrived ahead of the peer's selections
    pending: Vec<PeerMessage>,
    search_started_at: Option<Instant>,
    session: Option<Session>,
}

impl SessionNegotiator {
    pub fn new(service: Box<dyn MatchmakingService>, config: &MatchmakingConfig) -> Self {
        Self {
            state: NegotiationState::Disconnected,
            service,
            search_timeout: config.search_timeout(),
            local: PlayerSelections::default(),
            opponent: None,
            link: None,
            pending: Vec::new(),
            search_started_at: None,
            session: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_selections(&self) -> &PlayerSelections {
        &self.local
    }

    pub fn opponent(&self) -> Option<&OpponentInfo> {
        self.opponent.as_ref()
    }

    /// Start looking for an opponent.
    ///
    /// Requires `Disconnected` and a connect code. The character may still be
    /// chosen with [`SessionNegotiator::set_selections`] while searching.
    pub fn start_search(&mut self, selections: PlayerSelections) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Disconnected {
            return Err(NegotiationError::InvalidState {
                action: "start a search",
                state: self.state,
            });
        }

        self.local.merge(&selections);
        let code = self
            .local
            .connect_code
            .clone()
            .ok_or(SelectionMismatch::MissingConnectCode)?;

        self.service.begin_search(&code)?;
        self.search_started_at = Some(Instant::now());
        self.state = NegotiationState::Searching;
        tracing::info!(%code, "searching for opponent");
        Ok(())
    }

    /// Merge set fields of `update` into our selections.
    ///
    /// Only allowed before the selection exchange starts.
    pub fn set_selections(&mut self, update: &PlayerSelections) -> Result<(), NegotiationError> {
        match self.state {
            NegotiationState::Disconnected | NegotiationState::Searching => {
                self.local.merge(update);
                Ok(())
            }
            state => Err(NegotiationError::InvalidState {
                action: "change selections",
                state,
            }),
        }
    }

    /// Advance the handshake.
    pub fn poll(&mut self) -> Result<NegotiationEvent, NegotiationError> {
        self.poll_at(Instant::now())
    }

    /// Advance the handshake as of `now`.
    pub fn poll_at(&mut self, now: Instant) -> Result<NegotiationEvent, NegotiationError> {
        match self.state {
            NegotiationState::Searching
            | NegotiationState::OpponentFound
            | NegotiationState::ExchangingSelections => {}
            _ => return Ok(NegotiationEvent::Pending),
        }

        if let Some(started) = self.search_started_at {
            if now.saturating_duration_since(started) >= self.search_timeout {
                tracing::warn!(timeout = ?self.search_timeout, state = ?self.state, "search timed out");
                return self.fail(NegotiationError::SearchTimeout(self.search_timeout));
            }
        }

        match self.state {
            NegotiationState::Searching => self.poll_search(),
            NegotiationState::ExchangingSelections => self.poll_exchange(),
            _ => Ok(NegotiationEvent::Pending),
        }
    }

    /// Hand the built session to the caller. `None` until `Connected`, and
    /// after the first call.
    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// The live session's link went away.
    pub fn notify_connection_lost(&mut self) {
        if self.state != NegotiationState::Disconnected {
            tracing::info!(state = ?self.state, "connection lost");
            self.teardown();
        }
    }

    /// Tear down everything and return to `Disconnected`.
    ///
    /// Returns `false` when there was nothing to clean up.
    pub fn cleanup(&mut self) -> bool {
        if self.state == NegotiationState::Disconnected {
            return false;
        }
        tracing::debug!(state = ?self.state, "cleaning up negotiation");
        self.teardown();
        true
    }

    /// Clean up and forget the local identity along with every selection.
    pub fn logout(&mut self) {
        self.cleanup();
        if let Some(code) = self.local.connect_code.take() {
            tracing::info!(%code, "logged out");
        }
        self.local = PlayerSelections::default();
    }

    fn poll_search(&mut self) -> Result<NegotiationEvent, NegotiationError> {
        let opponent = match self.service.poll() {
            SearchPoll::Pending => return Ok(NegotiationEvent::Pending),
            SearchPoll::Failed(reason) => {
                return self.fail(ServiceError::Unavailable(reason).into());
            }
            SearchPoll::Found(opponent) => opponent,
        };

        tracing::info!(
            opponent = %opponent.remote_code,
            local_port = opponent.local_port,
            "opponent found"
        );
        self.state = NegotiationState::OpponentFound;
        self.opponent = Some(opponent.clone());

        let mut link = match self.service.connect(&opponent) {
            Ok(link) => link,
            Err(e) => return self.fail(e.into()),
        };

        if let Err(mismatch) = self.local.validate_complete() {
            let _ = link.send(&PeerMessage::Goodbye(GoodbyeReason::SelectionMismatch));
            link.close();
            return self.fail(mismatch.into());
        }
        if let Err(e) = link.send(&PeerMessage::Selections(self.local.clone())) {
            link.close();
            return self.fail(e.into());
        }

        self.link = Some(link);
        self.state = NegotiationState::ExchangingSelections;
        Ok(NegotiationEvent::OpponentFound(opponent))
    }

    fn poll_exchange(&mut self) -> Result<NegotiationEvent, NegotiationError> {
        let Some(link) = self.link.as_mut() else {
            return self.fail(LinkError::Closed.into());
        };

        let mut remote = None;
        let mut peer_left = false;
        for message in link.poll() {
            match message {
                PeerMessage::Selections(selections) => remote = Some(selections),
                PeerMessage::Goodbye(reason) => {
                    tracing::info!(%reason, "peer left during selection exchange");
                    peer_left = true;
                }
                other => self.pending.push(other),
            }
        }
        if peer_left || link.status() == LinkStatus::Disconnected {
            return self.fail(LinkError::Closed.into());
        }

        let Some(remote) = remote else {
            return Ok(NegotiationEvent::Pending);
        };
        if let Err(mismatch) = remote.validate_complete() {
            let _ = link.send(&PeerMessage::Goodbye(GoodbyeReason::SelectionMismatch));
            return self.fail(mismatch.into());
        }

        let Some(opponent) = self.opponent.clone() else {
            return self.fail(LinkError::Closed.into());
        };
        let Some(link) = self.link.take() else {
            return self.fail(LinkError::Closed.into());
        };

        let (port1, port2) = if opponent.local_port == 1 {
            (&self.local, &remote)
        } else {
            (&remote, &self.local)
        };
        let stage = resolve_stage(port1.stage, port2.stage, opponent.seed);

        let session = Session::new(
            link,
            self.local.clone(),
            remote,
            stage,
            opponent.seed,
            opponent.local_port,
        )
        .with_pending(std::mem::take(&mut self.pending));

        tracing::info!(
            session = session.id,
            %stage,
            local_port = opponent.local_port,
            "session negotiated"
        );
        self.session = Some(session);
        self.search_started_at = None;
        self.state = NegotiationState::Connected;
        Ok(NegotiationEvent::Connected)
    }

    fn fail(&mut self, error: NegotiationError) -> Result<NegotiationEvent, NegotiationError> {
        tracing::warn!(error = %error, state = ?self.state, "negotiation failed");
        self.teardown();
        Err(error)
    }

    fn teardown(&mut self) {
        self.state = NegotiationState::CleaningUp;
        self.service.cancel();
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.link.close();
        }
        self.session = None;
        self.opponent = None;
        self.pending.clear();
        self.search_started_at = None;
        // Selections are per session, the connect code outlives it
        self.local = PlayerSelections {
            connect_code: self.local.connect_code.take(),
            ..Default::default()
        };
        self.state = NegotiationState::Disconnected;
    }
}
