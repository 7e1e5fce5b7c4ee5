//! Command-tagged byte protocol
//!
//! Every request is `[command u8][payload]`. Integers are big-endian.
//!
//! | cmd    | request payload                 | response                                   |
//! |--------|---------------------------------|--------------------------------------------|
//! | `0xB0` | step i32, input bytes           | code u8, latest remote i32, remote frames  |
//! | `0xB1` | step i32, state bytes           | ack u8                                     |
//! | `0xB2` | step i32                        | found u8, state bytes                      |
//! | `0xB3` |                                 | bitcode `SessionStatus`                    |
//! | `0xB4` | bitcode `PlayerSelections`      | ack u8                                     |
//! | `0xB5` | bitcode `PlayerSelections`      | ack u8                                     |
//! | `0xB7` |                                 | ack u8                                     |
//! | `0xB9` |                                 | bitcode `OnlineStatus`                     |
//! | `0xBA` |                                 | ack u8                                     |
//! | `0xD0` | level u8, UTF-8 message         | ack u8                                     |
//!
//! Remote frames in the `0xB0` response are `count u8` followed by
//! `[step i32][len u16][bytes]` per frame. A latest remote step of
//! `i32::MIN` means no remote input yet.

use byteorder::{BigEndian, ReadBytesExt};
use rollsync_shared::PlayerSelections;

use super::sync_core::SyncCore;
use crate::step::{InputFrame, StepIndex};
use crate::sync::StepResponse;

pub const CMD_SUBMIT_INPUT: u8 = 0xB0;
pub const CMD_CAPTURE_STATE: u8 = 0xB1;
pub const CMD_RESTORE_STATE: u8 = 0xB2;
pub const CMD_QUERY_STATUS: u8 = 0xB3;
pub const CMD_BEGIN_SEARCH: u8 = 0xB4;
pub const CMD_SET_SELECTIONS: u8 = 0xB5;
pub const CMD_LOGOUT: u8 = 0xB7;
pub const CMD_ONLINE_STATUS: u8 = 0xB9;
pub const CMD_CLEANUP: u8 = 0xBA;
pub const CMD_LOG: u8 = 0xD0;

pub const ACK_OK: u8 = 1;
pub const ACK_ERR: u8 = 0;

/// Latest remote step sent when there is no remote input yet
pub const NO_REMOTE_STEP: StepIndex = i32::MIN;

/// Malformed host requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command 0x{0:02X}")]
    Unknown(u8),
    #[error("payload of command 0x{command:02X} is too short")]
    Truncated { command: u8 },
    #[error("invalid selections: {0}")]
    InvalidSelections(String),
    #[error("log message is not valid UTF-8")]
    InvalidUtf8,
}

/// A decoded host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    SubmitInput { step: StepIndex, input: Vec<u8> },
    CaptureState { step: StepIndex, state: Vec<u8> },
    RestoreState { step: StepIndex },
    QueryStatus,
    BeginSearch(PlayerSelections),
    SetSelections(PlayerSelections),
    /// Cleanup plus forgetting the local identity
    Logout,
    OnlineStatus,
    Cleanup,
    Log { level: u8, message: String },
}

impl HostCommand {
    pub fn parse(bytes: &[u8]) -> Result<Self, CommandError> {
        let (&command, mut payload) = bytes.split_first().ok_or(CommandError::Empty)?;
        let truncated = |_: std::io::Error| CommandError::Truncated { command };
        let selections = |payload: &[u8]| {
            bitcode::decode::<PlayerSelections>(payload)
                .map_err(|e| CommandError::InvalidSelections(e.to_string()))
        };

        match command {
            CMD_SUBMIT_INPUT => {
                let step = payload.read_i32::<BigEndian>().map_err(truncated)?;
                Ok(Self::SubmitInput {
                    step,
                    input: payload.to_vec(),
                })
            }
            CMD_CAPTURE_STATE => {
                let step = payload.read_i32::<BigEndian>().map_err(truncated)?;
                Ok(Self::CaptureState {
                    step,
                    state: payload.to_vec(),
                })
            }
            CMD_RESTORE_STATE => {
                let step = payload.read_i32::<BigEndian>().map_err(truncated)?;
                Ok(Self::RestoreState { step })
            }
            CMD_QUERY_STATUS => Ok(Self::QueryStatus),
            CMD_BEGIN_SEARCH => selections(payload).map(Self::BeginSearch),
            CMD_SET_SELECTIONS => selections(payload).map(Self::SetSelections),
            CMD_LOGOUT => Ok(Self::Logout),
            CMD_ONLINE_STATUS => Ok(Self::OnlineStatus),
            CMD_CLEANUP => Ok(Self::Cleanup),
            CMD_LOG => {
                let level = payload.read_u8().map_err(truncated)?;
                let message = std::str::from_utf8(payload)
                    .map_err(|_| CommandError::InvalidUtf8)?
                    .to_owned();
                Ok(Self::Log { level, message })
            }
            other => Err(CommandError::Unknown(other)),
        }
    }

    /// Encode as the host would send it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::SubmitInput { step, input } => {
                out.push(CMD_SUBMIT_INPUT);
                out.extend_from_slice(&step.to_be_bytes());
                out.extend_from_slice(input);
            }
            Self::CaptureState { step, state } => {
                out.push(CMD_CAPTURE_STATE);
                out.extend_from_slice(&step.to_be_bytes());
                out.extend_from_slice(state);
            }
            Self::RestoreState { step } => {
                out.push(CMD_RESTORE_STATE);
                out.extend_from_slice(&step.to_be_bytes());
            }
            Self::QueryStatus => out.push(CMD_QUERY_STATUS),
            Self::BeginSearch(selections) => {
                out.push(CMD_BEGIN_SEARCH);
                out.extend_from_slice(&bitcode::encode(selections));
            }
            Self::SetSelections(selections) => {
                out.push(CMD_SET_SELECTIONS);
                out.extend_from_slice(&bitcode::encode(selections));
            }
            Self::Logout => out.push(CMD_LOGOUT),
            Self::OnlineStatus => out.push(CMD_ONLINE_STATUS),
            Self::Cleanup => out.push(CMD_CLEANUP),
            Self::Log { level, message } => {
                out.push(CMD_LOG);
                out.push(*level);
                out.extend_from_slice(message.as_bytes());
            }
        }
        out
    }
}

/// Decoded `0xB0` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputResponse {
    pub code: u8,
    pub latest_remote_step: Option<StepIndex>,
    pub frames: Vec<(StepIndex, Vec<u8>)>,
}

impl InputResponse {
    fn encode(response: StepResponse, latest: Option<StepIndex>, frames: &[InputFrame]) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + frames.len() * 8);
        out.push(response.code());
        out.extend_from_slice(&latest.unwrap_or(NO_REMOTE_STEP).to_be_bytes());

        let frames = &frames[frames.len().saturating_sub(u8::MAX as usize)..];
        out.push(frames.len() as u8);
        for frame in frames {
            let len = frame.bytes.len().min(u16::MAX as usize);
            out.extend_from_slice(&frame.step.to_be_bytes());
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out.extend_from_slice(&frame.bytes[..len]);
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CommandError> {
        let truncated = |_: std::io::Error| CommandError::Truncated {
            command: CMD_SUBMIT_INPUT,
        };
        let mut cursor = bytes;
        let code = cursor.read_u8().map_err(truncated)?;
        let latest = cursor.read_i32::<BigEndian>().map_err(truncated)?;
        let count = cursor.read_u8().map_err(truncated)?;

        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let step = cursor.read_i32::<BigEndian>().map_err(truncated)?;
            let len = cursor.read_u16::<BigEndian>().map_err(truncated)? as usize;
            if cursor.len() < len {
                return Err(CommandError::Truncated {
                    command: CMD_SUBMIT_INPUT,
                });
            }
            let (data, rest) = cursor.split_at(len);
            frames.push((step, data.to_vec()));
            cursor = rest;
        }

        Ok(Self {
            code,
            latest_remote_step: (latest != NO_REMOTE_STEP).then_some(latest),
            frames,
        })
    }
}

impl SyncCore {
    /// Decode and run one host command, returning the response bytes.
    ///
    /// Malformed commands are logged and answered with a failed ack.
    pub fn dispatch(&mut self, bytes: &[u8]) -> Vec<u8> {
        match HostCommand::parse(bytes) {
            Ok(command) => self.execute(command),
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "rejected host command");
                vec![ACK_ERR]
            }
        }
    }

    pub fn execute(&mut self, command: HostCommand) -> Vec<u8> {
        match command {
            HostCommand::SubmitInput { step, input } => {
                let response = self.submit_input(step, &input);
                let latest = self.controller().latest_remote_step();
                let window = self.config().rollback.window as StepIndex;
                let frames = match latest {
                    Some(latest) => self
                        .controller()
                        .remote_frames_from(latest.saturating_sub(window)),
                    None => Vec::new(),
                };
                InputResponse::encode(response, latest, &frames)
            }
            HostCommand::CaptureState { step, state } => {
                ack(self.capture_state(step, &state).map_err(|e| {
                    tracing::warn!(step, error = %e, "capture failed");
                }))
            }
            HostCommand::RestoreState { step } => match self.restore_state(step) {
                Ok(state) => {
                    let mut out = Vec::with_capacity(1 + state.len());
                    out.push(1);
                    out.extend_from_slice(&state);
                    out
                }
                Err(e) => {
                    tracing::debug!(step, error = %e, "restore miss");
                    vec![0]
                }
            },
            HostCommand::QueryStatus => self.status().to_bytes(),
            HostCommand::BeginSearch(selections) => ack(self.begin_search(selections).map_err(|e| {
                tracing::warn!(error = %e, "search not started");
            })),
            HostCommand::SetSelections(update) => ack(self.set_selections(&update).map_err(|e| {
                tracing::warn!(error = %e, "selections rejected");
            })),
            HostCommand::Logout => {
                self.logout();
                vec![ACK_OK]
            }
            HostCommand::OnlineStatus => self.online_status().to_bytes(),
            HostCommand::Cleanup => {
                self.cleanup();
                vec![ACK_OK]
            }
            HostCommand::Log { level, message } => {
                log_host_message(level, &message);
                vec![ACK_OK]
            }
        }
    }
}

fn ack<T>(result: Result<T, ()>) -> Vec<u8> {
    vec![if result.is_ok() { ACK_OK } else { ACK_ERR }]
}

/// Forward a host log line into `tracing`. Levels: 0 error, 1 warn, 2 info,
/// 3 debug, anything else trace.
fn log_host_message(level: u8, message: &str) {
    match level {
        0 => tracing::error!(target: "rollsync::host", "{message}"),
        1 => tracing::warn!(target: "rollsync::host", "{message}"),
        2 => tracing::info!(target: "rollsync::host", "{message}"),
        3 => tracing::debug!(target: "rollsync::host", "{message}"),
        _ => tracing::trace!(target: "rollsync::host", "{message}"),
    }
}
