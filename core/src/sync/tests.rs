//! Tests for the synchronization controller

use rollsync_shared::{CharacterId, ConnectCode, PlayerSelections, StageId};

use super::*;
use crate::config::SyncThresholds;
use crate::net::{GoodbyeReason, InputPacket, LinkError, LinkStatus, LoopbackLink, PeerLink, PeerMessage};
use crate::step::{InputStatus, StepIndex};

const WINDOW: u32 = 7;

fn selections(code: &str) -> PlayerSelections {
    PlayerSelections::new(CharacterId(1), ConnectCode::parse(code).unwrap())
}

fn session(link: impl PeerLink + 'static) -> Session {
    Session::new(
        Box::new(link),
        selections("AAA#1"),
        selections("BBB#2"),
        StageId::BATTLEFIELD,
        42,
        1,
    )
}

fn thresholds(stall: u32, soft: u32, hard: u32, prediction: u32) -> SyncThresholds {
    SyncThresholds {
        stall_threshold: stall,
        soft_ffw_threshold: soft,
        hard_ffw_threshold: hard,
        prediction_window: prediction,
    }
}

/// Controller with a session whose peer end is returned for scripting.
fn started(thresholds: SyncThresholds) -> (SyncController, LoopbackLink) {
    let (local, peer) = LoopbackLink::pair();
    let mut controller = SyncController::new(thresholds, WINDOW);
    controller.begin(session(local)).unwrap();
    (controller, peer)
}

/// Link that silently loses the first `lose_inputs` input packets sent.
struct LossyLink {
    inner: LoopbackLink,
    lose_inputs: usize,
}

impl PeerLink for LossyLink {
    fn send(&mut self, message: &PeerMessage) -> Result<(), LinkError> {
        if matches!(message, PeerMessage::Input(_)) && self.lose_inputs > 0 {
            self.lose_inputs -= 1;
            return Ok(());
        }
        self.inner.send(message)
    }

    fn poll(&mut self) -> Vec<PeerMessage> {
        self.inner.poll()
    }

    fn status(&self) -> LinkStatus {
        self.inner.status()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

fn send_inputs(peer: &mut LoopbackLink, start_step: StepIndex, count: usize) {
    peer.send(&PeerMessage::Input(InputPacket {
        start_step,
        frames: vec![vec![0]; count],
        ack: None,
    }))
    .unwrap();
}

#[test]
fn test_idle_controller_terminates() {
    let mut controller = SyncController::new(SyncThresholds::default(), WINDOW);
    assert_eq!(controller.state(), SyncState::Idle);
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Terminate);
    assert!(!controller.should_capture(0));
}

#[test]
fn test_first_input_starts_running() {
    let (mut controller, _peer) = started(SyncThresholds::default());
    assert_eq!(controller.state(), SyncState::AwaitingLocalReady);

    assert_eq!(controller.handle_step(-123, &[1]), StepResponse::Continue);
    assert_eq!(controller.state(), SyncState::Running);
    assert_eq!(
        controller.drain_events(),
        vec![SyncEvent::Started { step: -123 }]
    );
}

#[test]
fn test_begin_twice_rejected() {
    let (mut controller, _peer) = started(SyncThresholds::default());
    let (other, _other_peer) = LoopbackLink::pair();
    assert_eq!(
        controller.begin(session(other)),
        Err(SyncError::SessionActive)
    );
}

#[test]
fn test_local_input_is_sent() {
    let (mut controller, mut peer) = started(SyncThresholds::default());
    controller.handle_step(0, &[7, 7]);
    let received = peer.poll();
    assert_eq!(
        received,
        vec![PeerMessage::Input(InputPacket {
            start_step: 0,
            frames: vec![vec![7, 7]],
            ack: None,
        })]
    );
}

#[test]
fn test_stall_threshold_and_resume() {
    let stall_threshold = 3;
    let (mut controller, mut peer) = started(thresholds(stall_threshold, 3, 7, 0));

    // Below and at the threshold: waiting, not yet flagged
    for _ in 0..stall_threshold {
        assert_eq!(controller.handle_step(0, &[0]), StepResponse::Wait);
        assert_eq!(controller.state(), SyncState::Stalling);
        assert!(!controller.is_connection_stalled());
    }

    // Threshold + 1
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Wait);
    assert!(controller.is_connection_stalled());
    let events = controller.drain_events();
    assert!(events.contains(&SyncEvent::Stalled { step: 0 }));
    assert!(events.contains(&SyncEvent::ConnectionStalled {
        step: 0,
        stalled_steps: 4
    }));

    send_inputs(&mut peer, 0, 1);
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Continue);
    assert_eq!(controller.state(), SyncState::Running);
    let stats = controller.stats().unwrap();
    assert_eq!(stats.stall_count, 0);
    assert_eq!(stats.total_stalled_steps, 4);
    assert!(stats.connection_stalled);
    assert_eq!(
        controller.drain_events(),
        vec![SyncEvent::Resumed {
            step: 0,
            stalled_steps: 4
        }]
    );
}

#[test]
fn test_prediction_window_allows_speculation() {
    let (mut controller, _peer) = started(thresholds(100, 3, 7, 2));
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Continue);
    assert_eq!(controller.handle_step(1, &[0]), StepResponse::Continue);
    assert_eq!(controller.handle_step(2, &[0]), StepResponse::Wait);
}

#[test]
fn test_fast_forward_boundaries() {
    // Remote lead of soft - 1: no fast-forward
    let (mut controller, mut peer) = started(thresholds(100, 3, 7, 7));
    send_inputs(&mut peer, 0, 3);
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Continue);

    // Remote lead of soft
    let (mut controller, mut peer) = started(thresholds(100, 3, 7, 7));
    send_inputs(&mut peer, 0, 4);
    assert_eq!(
        controller.handle_step(0, &[0]),
        StepResponse::FastForward(FfwIntensity::Soft)
    );
    assert_eq!(controller.state(), SyncState::FastForwarding);

    // Remote lead of hard
    let (mut controller, mut peer) = started(thresholds(100, 3, 7, 7));
    send_inputs(&mut peer, 0, 8);
    assert_eq!(
        controller.handle_step(0, &[0]),
        StepResponse::FastForward(FfwIntensity::Hard)
    );
}

#[test]
fn test_fast_forward_exits_when_caught_up() {
    let (mut controller, mut peer) = started(thresholds(100, 3, 7, 7));
    send_inputs(&mut peer, 0, 4);

    for step in 0..3 {
        assert!(matches!(
            controller.handle_step(step, &[0]),
            StepResponse::FastForward(_)
        ));
    }
    assert_eq!(controller.handle_step(3, &[0]), StepResponse::Continue);
    assert_eq!(controller.state(), SyncState::Running);

    let stats = controller.stats().unwrap();
    assert_eq!(stats.last_ffw_step, Some(2));
    assert_eq!(stats.ffw_steps, 3);
    let events = controller.drain_events();
    assert!(events.contains(&SyncEvent::FastForwardStarted {
        step: 0,
        intensity: FfwIntensity::Soft
    }));
    assert!(events.contains(&SyncEvent::FastForwardEnded { step: 3 }));
}

#[test]
fn test_peer_goodbye_terminates() {
    let (mut controller, mut peer) = started(SyncThresholds::default());
    controller.handle_step(0, &[0]);
    peer.send(&PeerMessage::Goodbye(GoodbyeReason::Quit)).unwrap();

    assert_eq!(controller.handle_step(1, &[0]), StepResponse::Terminate);
    assert_eq!(controller.state(), SyncState::Terminated);
    assert!(
        controller
            .drain_events()
            .contains(&SyncEvent::Terminated {
                reason: TerminationReason::PeerGoodbye(GoodbyeReason::Quit)
            })
    );

    let session = controller.take_session().unwrap();
    assert_eq!(session.link().status(), LinkStatus::Disconnected);
    assert_eq!(controller.handle_step(2, &[0]), StepResponse::Terminate);
}

#[test]
fn test_link_loss_terminates() {
    let (mut controller, peer) = started(SyncThresholds::default());
    drop(peer);
    assert_eq!(controller.handle_step(0, &[0]), StepResponse::Terminate);
    assert!(controller.drain_events().contains(&SyncEvent::Terminated {
        reason: TerminationReason::LinkLost
    }));
}

#[test]
fn test_terminate_sends_goodbye_once() {
    let (mut controller, mut peer) = started(SyncThresholds::default());
    controller.handle_step(0, &[0]);
    peer.poll();

    let session = controller.terminate(TerminationReason::LocalQuit);
    assert!(session.is_some());
    assert_eq!(
        peer.poll(),
        vec![PeerMessage::Goodbye(GoodbyeReason::Quit)]
    );
    assert!(controller.terminate(TerminationReason::LocalQuit).is_none());
}

#[test]
fn test_reset_returns_to_idle() {
    let (mut controller, _peer) = started(SyncThresholds::default());
    controller.handle_step(0, &[0]);
    assert!(controller.reset().is_some());
    assert_eq!(controller.state(), SyncState::Idle);
    assert!(controller.reset().is_none());

    let (link, _peer) = LoopbackLink::pair();
    assert!(controller.begin(session(link)).is_ok());
}

#[test]
fn test_misprediction_reported() {
    let (mut controller, mut peer) = started(SyncThresholds::default());
    peer.send(&PeerMessage::Input(InputPacket {
        start_step: 0,
        frames: vec![vec![1]],
        ack: None,
    }))
    .unwrap();
    controller.handle_step(0, &[0]);

    let (frame, status) = controller.remote_input_or_prediction(1).unwrap();
    assert_eq!(status, InputStatus::Predicted);
    assert_eq!(frame.bytes.as_slice(), &[1]);
    controller.handle_step(1, &[0]);

    peer.send(&PeerMessage::Input(InputPacket {
        start_step: 1,
        frames: vec![vec![5]],
        ack: None,
    }))
    .unwrap();
    controller.handle_step(2, &[0]);

    assert!(
        controller
            .drain_events()
            .contains(&SyncEvent::Mispredicted { step: 1 })
    );
    assert_eq!(controller.stats().unwrap().mispredictions, 1);
    let (_, status) = controller.remote_input_or_prediction(1).unwrap();
    assert_eq!(status, InputStatus::Confirmed);
}

#[test]
fn test_should_capture_tracks_confirmed_step() {
    let (mut controller, mut peer) = started(SyncThresholds::default());
    assert!(controller.should_capture(0));

    send_inputs(&mut peer, 0, 1);
    controller.handle_step(0, &[0]);
    assert_eq!(controller.stats().unwrap().last_processed_step, Some(0));
    assert!(controller.should_capture(WINDOW as StepIndex));
    assert!(!controller.should_capture(WINDOW as StepIndex + 1));
}

#[test]
fn test_two_controllers_confirm_steps() {
    let (a_link, b_link) = LoopbackLink::pair();
    let mut a = SyncController::new(SyncThresholds::default(), WINDOW);
    let mut b = SyncController::new(SyncThresholds::default(), WINDOW);
    a.set_record_confirmed(true);
    a.begin(session(a_link)).unwrap();
    b.begin(session(b_link)).unwrap();

    for step in 0..20 {
        assert_eq!(a.handle_step(step, &[1]), StepResponse::Continue);
        assert_eq!(b.handle_step(step, &[2]), StepResponse::Continue);
    }

    assert_eq!(a.stats().unwrap().last_processed_step, Some(18));
    assert_eq!(b.stats().unwrap().last_processed_step, Some(19));

    let confirmed = a.drain_confirmed();
    assert_eq!(confirmed.len(), 19);
    assert!(
        confirmed
            .iter()
            .enumerate()
            .all(|(i, c)| c.step == i as StepIndex && c.local.as_slice() == [1] && c.remote.as_slice() == [2])
    );
    assert!(b.drain_confirmed().is_empty());
}

#[test]
fn test_remote_gap_stalls_until_resent() {
    let (mut controller, mut peer) = started(thresholds(1000, 3, 7, 7));
    // Step 0 arrives, 1..=9 are lost, the peer keeps going from 10
    send_inputs(&mut peer, 0, 1);
    send_inputs(&mut peer, 10, 190);

    for step in 0..8 {
        assert_ne!(controller.handle_step(step, &[0]), StepResponse::Wait);
    }
    for _ in 0..200 {
        assert_eq!(controller.handle_step(8, &[0]), StepResponse::Wait);
    }
    assert_eq!(controller.state(), SyncState::Stalling);
    assert_eq!(controller.stats().unwrap().last_processed_step, Some(0));
    assert!(controller.should_capture(7));

    // Every outgoing packet tells the peer where its inputs stop being
    // contiguous
    let Some(PeerMessage::Input(last)) = peer.poll().pop() else {
        panic!("expected an input packet");
    };
    assert_eq!(last.ack, Some(0));
    assert_eq!(last.start_step, 0);
    assert_eq!(last.last_step(), Some(8));

    send_inputs(&mut peer, 1, 9);
    assert!(matches!(
        controller.handle_step(8, &[0]),
        StepResponse::FastForward(_)
    ));
    assert_eq!(controller.stats().unwrap().last_processed_step, Some(8));
    assert!(controller.drain_events().contains(&SyncEvent::Resumed {
        step: 8,
        stalled_steps: 200
    }));
}

#[test]
fn test_lost_inputs_are_recovered() {
    let (a_link, b_link) = LoopbackLink::pair();
    let a_link = LossyLink {
        inner: a_link,
        lose_inputs: 20,
    };
    let mut a = SyncController::new(SyncThresholds::default(), WINDOW);
    let mut b = SyncController::new(SyncThresholds::default(), WINDOW);
    b.set_record_confirmed(true);
    a.begin(session(a_link)).unwrap();
    b.begin(session(b_link)).unwrap();

    let (mut a_step, mut b_step) = (0, 0);
    for _ in 0..400 {
        if a_step < 60 && a.handle_step(a_step, &[1]) != StepResponse::Wait {
            a_step += 1;
        }
        if b_step < 60 && b.handle_step(b_step, &[2]) != StepResponse::Wait {
            b_step += 1;
        }
    }
    assert_eq!((a_step, b_step), (60, 60));
    assert!(a.stats().unwrap().last_processed_step >= Some(50));

    let confirmed = b.drain_confirmed();
    assert!(confirmed.len() >= 50);
    assert!(
        confirmed
            .iter()
            .enumerate()
            .all(|(i, c)| c.step == i as StepIndex && c.local.as_slice() == [2] && c.remote.as_slice() == [1])
    );
}
