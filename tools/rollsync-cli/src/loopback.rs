//! Loopback command - two peers in one process
//!
//! Both peers are matched through an in-process broker and exchange inputs
//! over a loopback link with simulated latency. Each peer runs a toy
//! simulation whose state depends on both players' inputs, rolls back on
//! mispredictions, and the confirmed states are compared at the end. A
//! mismatch fails the command.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use rollsync_core::matchmaking::{LocalBroker, NegotiationEvent};
use rollsync_core::{StepIndex, StepResponse, SyncCore, SyncEvent, SyncState};
use rollsync_shared::{CharacterId, ConnectCode, PlayerSelections};
use xxhash_rust::xxh3::xxh3_64;

use crate::config_cmd;

/// Arguments for the loopback command
#[derive(Args)]
pub struct LoopbackArgs {
    /// Steps each peer simulates
    #[arg(long, default_value = "600")]
    pub steps: StepIndex,

    /// Link latency in steps
    #[arg(long, default_value = "2")]
    pub latency: u32,

    /// Skip peer B's turn every N iterations (0 = never)
    #[arg(long, default_value = "0")]
    pub slow_every: u32,

    /// Simulation state size in bytes
    #[arg(long, default_value = "4096")]
    pub state_size: usize,

    /// Broker seed (decides ports, shared seed and stage)
    #[arg(long, default_value = "1")]
    pub seed: u64,

    /// Write peer A's replay into this directory
    #[arg(long)]
    pub replay_dir: Option<PathBuf>,

    /// Config file to start from
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Default)]
struct Counters {
    waits: u64,
    fast_forwards: u64,
    rollbacks: u64,
    resimulated: u64,
}

struct Peer {
    name: &'static str,
    core: SyncCore,
    /// Mixed into the generated inputs so the peers differ
    salt: u8,
    step: StepIndex,
    state: Vec<u8>,
    done: bool,
    counters: Counters,
}

impl Peer {
    fn input_for(&self, step: StepIndex) -> u8 {
        // Changes every few steps so predictions are sometimes wrong
        ((step / 4) as u8).wrapping_mul(self.salt)
    }

    fn tick(&mut self, target: StepIndex) -> Result<()> {
        if self.done || self.step >= target {
            return Ok(());
        }

        let input = self.input_for(self.step);
        let response = self.core.submit_input(self.step, &[input]);

        for event in self.core.drain_events() {
            match event {
                SyncEvent::Mispredicted { step } => self.rollback(step)?,
                SyncEvent::Terminated { reason } => {
                    tracing::info!(peer = self.name, %reason, "session terminated");
                }
                _ => {}
            }
        }

        match response {
            StepResponse::Wait => self.counters.waits += 1,
            StepResponse::Terminate => self.done = true,
            StepResponse::FastForward(_) => {
                self.counters.fast_forwards += 1;
                self.advance()?;
            }
            StepResponse::Continue => self.advance()?,
        }
        Ok(())
    }

    /// Capture the state before the current step if it may still be rolled
    /// back to, then simulate the step.
    fn advance(&mut self) -> Result<()> {
        if self.core.should_capture(self.step) {
            self.core.capture_state(self.step, &self.state)?;
        }
        self.simulate_step();
        Ok(())
    }

    /// Advance the toy simulation by one step.
    fn simulate_step(&mut self) {
        let local = self.input_for(self.step);
        let remote = self
            .core
            .remote_input_or_prediction(self.step)
            .and_then(|(frame, _)| frame.bytes.first().copied())
            .unwrap_or(0);

        let len = self.state.len() as StepIndex;
        let index = self.step.rem_euclid(len) as usize;
        self.state[index] = self.state[index].wrapping_add(local ^ remote);
        self.step += 1;
    }

    /// Restore the state before `from` and replay up to the current step.
    fn rollback(&mut self, from: StepIndex) -> Result<()> {
        if from >= self.step {
            return Ok(());
        }
        let state = match self.core.restore_state(from) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(peer = self.name, step = from, error = %e, "cannot roll back");
                return Ok(());
            }
        };

        let current = self.step;
        self.state = state;
        self.step = from;
        while self.step < current {
            self.core.capture_state(self.step, &self.state)?;
            self.simulate_step();
            self.counters.resimulated += 1;
        }
        self.counters.rollbacks += 1;
        Ok(())
    }

    fn report(&self) {
        let status = self.core.status();
        println!(
            "peer {} (port {}): reached step {}",
            self.name,
            status.local_port.map_or("-".to_string(), |p| p.to_string()),
            self.step
        );
        println!(
            "  confirmed through {:?}, latest remote {:?}",
            status.last_processed_step, status.latest_remote_step
        );
        println!(
            "  waits {} (stalled steps {}, connection stalled: {})",
            self.counters.waits, status.total_stalled_steps, status.connection_stalled
        );
        println!(
            "  fast-forwards {} (last at {:?})",
            self.counters.fast_forwards, status.last_ffw_step
        );
        println!(
            "  mispredictions {}, rollbacks {}, resimulated steps {}",
            status.mispredictions, self.counters.rollbacks, self.counters.resimulated
        );
    }
}

/// How the peers' states compared at their newest common confirmed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Agree { step: StepIndex, checksum: u64 },
    Desync { step: StepIndex, a: u64, b: u64 },
    /// Nothing confirmed yet, or the snapshot is no longer retained
    Unavailable,
}

pub fn execute(args: LoopbackArgs) -> Result<()> {
    match run(&args)? {
        Comparison::Desync { step, a, b } => {
            bail!("peers disagree on the state at step {step}: {a:016x} != {b:016x}")
        }
        Comparison::Agree { step, checksum } => {
            tracing::debug!(step, checksum, "loopback peers agree");
            Ok(())
        }
        Comparison::Unavailable => Ok(()),
    }
}

fn run(args: &LoopbackArgs) -> Result<Comparison> {
    if args.steps <= 0 {
        bail!("--steps must be positive");
    }

    let mut config = config_cmd::load(args.config.as_ref());
    config.rollback.snapshot_size = args.state_size.max(1);
    config.persistence.enabled = false;
    config.validate().context("Invalid configuration")?;

    let mut recording = config.clone();
    if let Some(dir) = &args.replay_dir {
        recording.persistence.enabled = true;
        recording.persistence.replay_dir = Some(dir.clone());
    }

    let broker = LocalBroker::with_seed(args.seed).with_link_delay(args.latency);
    let mut a = Peer {
        name: "A",
        core: SyncCore::new(recording, Box::new(broker.client()))
            .context("Failed to start peer A")?,
        salt: 3,
        step: 0,
        state: vec![0; config.rollback.snapshot_size],
        done: false,
        counters: Counters::default(),
    };
    let mut b = Peer {
        name: "B",
        core: SyncCore::new(config.clone(), Box::new(broker.client()))
            .context("Failed to start peer B")?,
        salt: 7,
        step: 0,
        state: vec![0; config.rollback.snapshot_size],
        done: false,
        counters: Counters::default(),
    };

    negotiate(&mut a.core, &mut b.core)?;
    let status = a.core.status();
    println!(
        "session negotiated: seed {:?}, stage {:?}",
        status.seed, status.stage
    );

    let max_iterations = (args.steps as u64 + 100) * 50;
    let mut iteration: u64 = 0;
    while !(a.done || a.step >= args.steps) || !(b.done || b.step >= args.steps) {
        iteration += 1;
        if iteration > max_iterations {
            bail!("peers made no progress after {max_iterations} iterations");
        }
        a.tick(args.steps)?;
        if args.slow_every == 0 || iteration % u64::from(args.slow_every) != 0 {
            b.tick(args.steps)?;
        }
    }

    println!();
    a.report();
    b.report();
    let comparison = compare_confirmed(&a, &b);

    a.core.end_session();
    b.core.end_session();
    a.core.flush_writes();
    if let Some(dir) = &args.replay_dir {
        println!("replay written to {}", dir.display());
    }
    Ok(comparison)
}

fn negotiate(a: &mut SyncCore, b: &mut SyncCore) -> Result<()> {
    a.begin_search(selections("PEER#1", 1)?)?;
    b.begin_search(selections("PEER#2", 2)?)?;

    for _ in 0..100 {
        let a_event = a.poll_matchmaking()?;
        let b_event = b.poll_matchmaking()?;
        if let NegotiationEvent::OpponentFound(info) = &a_event {
            tracing::debug!(opponent = %info.remote_code, "peer A matched");
        }
        if a.status().sync == SyncState::AwaitingLocalReady
            && b.status().sync == SyncState::AwaitingLocalReady
        {
            return Ok(());
        }
        if b_event == NegotiationEvent::Pending && a_event == NegotiationEvent::Pending {
            std::thread::yield_now();
        }
    }
    bail!("negotiation did not complete")
}

fn selections(code: &str, character: u8) -> Result<PlayerSelections> {
    let code = ConnectCode::parse(code).with_context(|| format!("Invalid connect code {code}"))?;
    Ok(PlayerSelections::new(CharacterId(character), code))
}

/// Compare both peers' snapshots at the newest step both have confirmed.
fn compare_confirmed(a: &Peer, b: &Peer) -> Comparison {
    let confirmed = a
        .core
        .status()
        .last_processed_step
        .zip(b.core.status().last_processed_step)
        .map(|(x, y)| x.min(y));
    let Some(step) = confirmed else {
        println!("no confirmed steps to compare");
        return Comparison::Unavailable;
    };

    match (a.core.restore_state(step), b.core.restore_state(step)) {
        (Ok(a_state), Ok(b_state)) => {
            let (a_sum, b_sum) = (xxh3_64(&a_state), xxh3_64(&b_state));
            if a_sum == b_sum {
                println!("states agree at step {step} (checksum {a_sum:016x})");
                Comparison::Agree {
                    step,
                    checksum: a_sum,
                }
            } else {
                println!("DESYNC at step {step}: {a_sum:016x} != {b_sum:016x}");
                Comparison::Desync {
                    step,
                    a: a_sum,
                    b: b_sum,
                }
            }
        }
        _ => {
            println!("snapshot for step {step} no longer retained; skipped comparison");
            Comparison::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &std::path::Path) -> LoopbackArgs {
        LoopbackArgs {
            steps: 120,
            latency: 2,
            slow_every: 0,
            state_size: 64,
            seed: 3,
            replay_dir: None,
            config: Some(dir.join("missing.toml")),
        }
    }

    fn assert_agree(comparison: Comparison) {
        assert!(
            matches!(comparison, Comparison::Agree { step, .. } if step >= 100),
            "{comparison:?}"
        );
    }

    #[test]
    fn test_loopback_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        assert_agree(run(&args(dir.path())).unwrap());
        assert!(execute(args(dir.path())).is_ok());
    }

    #[test]
    fn test_loopback_agrees_under_high_latency() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.latency = 6;
        args.seed = 9;
        assert_agree(run(&args).unwrap());
    }

    #[test]
    fn test_loopback_with_slow_peer_writes_replay() {
        let dir = tempfile::tempdir().unwrap();
        let replays = dir.path().join("replays");
        let mut args = args(dir.path());
        args.slow_every = 3;
        args.replay_dir = Some(replays.clone());

        assert_agree(run(&args).unwrap());

        let files: Vec<_> = std::fs::read_dir(&replays)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rsr"))
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_rejects_non_positive_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.steps = 0;
        assert!(execute(args).is_err());
    }
}
