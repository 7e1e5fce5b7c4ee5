//! Stage resolution

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rollsync_shared::{LEGAL_STAGES, StageId};

/// Pick a legal stage from the shared seed.
///
/// Pure: both peers derive the same stage from the same seed.
pub fn random_stage(seed: u64) -> StageId {
    let mut rng = Pcg32::seed_from_u64(seed);
    LEGAL_STAGES[rng.random_range(0..LEGAL_STAGES.len())]
}

/// Stage for the match given each port's choice.
///
/// Port 1's stage wins when both chose one; otherwise the seed decides.
pub fn resolve_stage(port1: Option<StageId>, port2: Option<StageId>, seed: u64) -> StageId {
    match (port1, port2) {
        (Some(stage), Some(_)) => stage,
        _ => random_stage(seed),
    }
}
