//! Asynchronous snapshot diffing
//!
//! Snapshots are delta-compressed against a reference state on a dedicated
//! runtime so the step thread never pays for compression. Results are keyed
//! by step and consumed through [`DiffTask`] handles.

mod codec;
mod pipeline;


pub use codec::{CodecError, DeltaCodec, XorLz4Codec};
pub use pipeline::{DiffBytes, DiffPipeline, DiffTask};

use crate::step::StepIndex;

/// Diff pipeline failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("diff for step {step} failed: {reason}")]
    Failed { step: StepIndex, reason: String },
    #[error("no diff submitted for step {step}")]
    NotSubmitted { step: StepIndex },
    #[error("diff for step {step} was discarded")]
    Cancelled { step: StepIndex },
}
