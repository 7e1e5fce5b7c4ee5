//! Controller states, per-step responses, and events

use bitcode::{Decode, Encode};

use crate::config::SyncThresholds;
use crate::net::GoodbyeReason;
use crate::step::StepIndex;

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum SyncState {
    /// No session
    #[default]
    Idle,
    /// Session started, waiting for the host's first local input
    AwaitingLocalReady,
    /// Inputs flowing normally
    Running,
    /// Too far ahead of the remote peer; the host is told to wait
    Stalling,
    /// Behind the remote peer; the host is told to run faster
    FastForwarding,
    /// Session over
    Terminated,
}

impl SyncState {
    /// Whether a session is attached and not yet terminated.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Terminated)
    }
}

/// How aggressively the host should catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfwIntensity {
    Soft,
    Hard,
}

impl FfwIntensity {
    /// Intensity for a remote lead of `lag` steps, `None` below the soft
    /// threshold.
    pub fn for_lag(lag: StepIndex, thresholds: &SyncThresholds) -> Option<Self> {
        if lag >= thresholds.hard_ffw_threshold as StepIndex {
            Some(Self::Hard)
        } else if lag >= thresholds.soft_ffw_threshold as StepIndex {
            Some(Self::Soft)
        } else {
            None
        }
    }
}

/// What the host should do with the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResponse {
    /// Do not advance; call again with the same step
    Wait,
    /// Advance normally
    Continue,
    /// Session is over
    Terminate,
    /// Advance without presenting intermediate steps
    FastForward(FfwIntensity),
}

impl StepResponse {
    /// Wire code sent back to the host.
    pub fn code(self) -> u8 {
        match self {
            Self::Wait => 0,
            Self::Continue => 1,
            Self::Terminate => 2,
            Self::FastForward(_) => 3,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Host ended the session
    LocalQuit,
    /// Peer said goodbye
    PeerGoodbye(GoodbyeReason),
    /// Link reported disconnected
    LinkLost,
    /// Sending local input failed
    SendFailed,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalQuit => write!(f, "local quit"),
            Self::PeerGoodbye(reason) => write!(f, "peer left ({})", reason),
            Self::LinkLost => write!(f, "link lost"),
            Self::SendFailed => write!(f, "send failed"),
        }
    }
}

/// Events for the host, drained with `SyncController::drain_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// First local input received
    Started { step: StepIndex },
    /// Entered the stalling state
    Stalled { step: StepIndex },
    /// Stall count passed the threshold
    ///
    /// Surfaced once per session. The session keeps running.
    ConnectionStalled { step: StepIndex, stalled_steps: u32 },
    /// Remote input caught up after a stall
    Resumed { step: StepIndex, stalled_steps: u32 },
    FastForwardStarted {
        step: StepIndex,
        intensity: FfwIntensity,
    },
    FastForwardEnded { step: StepIndex },
    /// Remote input arrived that differs from what was predicted
    ///
    /// The host should restore the snapshot before `step` and re-simulate.
    Mispredicted { step: StepIndex },
    Terminated { reason: TerminationReason },
}
