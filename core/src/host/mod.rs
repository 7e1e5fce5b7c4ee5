//! Host boundary
//!
//! [`SyncCore`] is the single entry point for a host simulation. Hosts that
//! talk over a byte channel use [`SyncCore::dispatch`] with the command
//! protocol in [`command`].

pub mod command;
mod sync_core;


pub use command::{CommandError, HostCommand, InputResponse};
pub use sync_core::{CleanupReport, OnlineStatus, RestoreHandle, SessionStatus, SyncCore};
