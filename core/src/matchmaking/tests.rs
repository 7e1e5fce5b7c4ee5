//! Tests for the session negotiator

use std::time::{Duration, Instant};

use rollsync_shared::{CharacterId, ConnectCode, PlayerSelections, SelectionMismatch, StageId};

use super::*;
use crate::config::MatchmakingConfig;
use crate::net::{InputPacket, PeerMessage};
use crate::sync::Session;

fn code(s: &str) -> ConnectCode {
    ConnectCode::parse(s).unwrap()
}

fn negotiator(broker: &LocalBroker) -> SessionNegotiator {
    SessionNegotiator::new(Box::new(broker.client()), &MatchmakingConfig::default())
}

/// Poll both negotiators until both are connected.
fn connect_both(a: &mut SessionNegotiator, b: &mut SessionNegotiator) -> (Session, Session) {
    for _ in 0..10 {
        a.poll().unwrap();
        b.poll().unwrap();
        if a.state() == NegotiationState::Connected && b.state() == NegotiationState::Connected {
            return (a.take_session().unwrap(), b.take_session().unwrap());
        }
    }
    panic!("negotiation did not finish: {:?} / {:?}", a.state(), b.state());
}

#[test]
fn test_two_peers_agree_on_session() {
    let broker = LocalBroker::with_seed(11);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);

    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();
    assert_eq!(a.state(), NegotiationState::Searching);
    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();

    let (a_session, b_session) = connect_both(&mut a, &mut b);
    assert_eq!(a_session.local_port, 1);
    assert_eq!(b_session.local_port, 2);
    assert_eq!(a_session.seed, b_session.seed);
    assert_eq!(a_session.id, b_session.id);
    assert_eq!(a_session.stage, b_session.stage);
    assert_eq!(a_session.stage, random_stage(a_session.seed));
    assert_eq!(a_session.players(), b_session.players());
    assert_eq!(a_session.remote.character, Some(CharacterId(9)));
    assert_eq!(b_session.remote.character, Some(CharacterId(2)));

    // Sessions are handed out once
    assert!(a.take_session().is_none());
}

#[test]
fn test_port_one_stage_wins() {
    let broker = LocalBroker::with_seed(3);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);

    a.start_search(
        PlayerSelections::new(CharacterId(2), code("FOX#1")).with_stage(StageId::FINAL_DESTINATION),
    )
    .unwrap();
    b.start_search(
        PlayerSelections::new(CharacterId(9), code("MRTH#9")).with_stage(StageId::BATTLEFIELD),
    )
    .unwrap();

    let (a_session, b_session) = connect_both(&mut a, &mut b);
    assert_eq!(a_session.stage, StageId::FINAL_DESTINATION);
    assert_eq!(b_session.stage, StageId::FINAL_DESTINATION);
}

#[test]
fn test_one_unset_stage_uses_seed() {
    for (a_stage, b_stage) in [(Some(StageId::FINAL_DESTINATION), None), (None, Some(StageId::BATTLEFIELD))] {
        let broker = LocalBroker::with_seed(17);
        let mut a = negotiator(&broker);
        let mut b = negotiator(&broker);

        a.start_search(PlayerSelections {
            stage: a_stage,
            ..PlayerSelections::new(CharacterId(2), code("FOX#1"))
        })
        .unwrap();
        b.start_search(PlayerSelections {
            stage: b_stage,
            ..PlayerSelections::new(CharacterId(9), code("MRTH#9"))
        })
        .unwrap();

        let (a_session, b_session) = connect_both(&mut a, &mut b);
        assert_eq!(a_session.local.stage, a_stage);
        assert_eq!(b_session.remote.stage, a_stage);
        assert_eq!(a_session.stage, random_stage(a_session.seed));
        assert_eq!(b_session.stage, a_session.stage);
    }
}

#[test]
fn test_early_messages_are_kept() {
    let broker = LocalBroker::with_seed(5);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);
    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();
    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();

    assert!(matches!(a.poll(), Ok(NegotiationEvent::OpponentFound(_))));
    assert!(matches!(b.poll(), Ok(NegotiationEvent::OpponentFound(_))));
    assert_eq!(a.poll().unwrap(), NegotiationEvent::Connected);

    let mut a_session = a.take_session().unwrap();
    let input = PeerMessage::Input(InputPacket {
        start_step: 0,
        frames: vec![vec![1, 2]],
        ack: None,
    });
    a_session.link.send(&input).unwrap();

    assert_eq!(b.poll().unwrap(), NegotiationEvent::Connected);
    let b_session = b.take_session().unwrap();
    assert_eq!(b_session.pending, vec![input]);
}

#[test]
fn test_search_times_out() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();

    assert_eq!(a.poll().unwrap(), NegotiationEvent::Pending);
    let later = Instant::now() + Duration::from_secs(31);
    assert!(matches!(
        a.poll_at(later),
        Err(NegotiationError::SearchTimeout(_))
    ));
    assert_eq!(a.state(), NegotiationState::Disconnected);

    // A later searcher is not paired with the abandoned search
    let mut b = negotiator(&broker);
    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();
    assert_eq!(b.poll().unwrap(), NegotiationEvent::Pending);
}

#[test]
fn test_start_search_twice_rejected() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();
    assert!(matches!(
        a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1"))),
        Err(NegotiationError::InvalidState {
            state: NegotiationState::Searching,
            ..
        })
    ));
}

#[test]
fn test_missing_connect_code() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    let selections = PlayerSelections {
        character: Some(CharacterId(2)),
        ..Default::default()
    };
    assert!(matches!(
        a.start_search(selections),
        Err(NegotiationError::SelectionMismatch(
            SelectionMismatch::MissingConnectCode
        ))
    ));
    assert_eq!(a.state(), NegotiationState::Disconnected);
}

#[test]
fn test_incomplete_selections_fail_both_peers() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);

    a.start_search(PlayerSelections {
        connect_code: Some(code("FOX#1")),
        ..Default::default()
    })
    .unwrap();
    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();

    assert!(matches!(
        a.poll(),
        Err(NegotiationError::SelectionMismatch(
            SelectionMismatch::MissingCharacter { .. }
        ))
    ));
    assert_eq!(a.state(), NegotiationState::Disconnected);

    assert!(matches!(b.poll(), Err(NegotiationError::Connection(_))));
    assert_eq!(b.state(), NegotiationState::Disconnected);
}

#[test]
fn test_selections_merge_while_searching() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);

    a.start_search(PlayerSelections {
        connect_code: Some(code("FOX#1")),
        ..Default::default()
    })
    .unwrap();
    a.set_selections(&PlayerSelections {
        character: Some(CharacterId(4)),
        character_color: 2,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(a.local_selections().character, Some(CharacterId(4)));
    assert_eq!(a.local_selections().connect_code, Some(code("FOX#1")));

    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();
    assert!(matches!(a.poll(), Ok(NegotiationEvent::OpponentFound(_))));
    assert_eq!(a.state(), NegotiationState::ExchangingSelections);
    assert!(matches!(
        a.set_selections(&PlayerSelections::default()),
        Err(NegotiationError::InvalidState { .. })
    ));
}

#[test]
fn test_cleanup_is_idempotent() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);
    assert!(!a.cleanup());

    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();
    b.start_search(PlayerSelections::new(CharacterId(9), code("MRTH#9")))
        .unwrap();
    for _ in 0..3 {
        a.poll().unwrap();
        b.poll().unwrap();
    }
    assert_eq!(a.state(), NegotiationState::Connected);

    assert!(a.cleanup());
    assert_eq!(a.state(), NegotiationState::Disconnected);
    assert!(a.take_session().is_none());
    assert!(a.opponent().is_none());
    assert!(!a.cleanup());

    // The negotiator can search again
    assert!(
        a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
            .is_ok()
    );
}

#[test]
fn test_cleanup_forgets_selections_but_keeps_code() {
    let broker = LocalBroker::with_seed(4);
    let mut a = negotiator(&broker);
    let mut b = negotiator(&broker);

    a.start_search(
        PlayerSelections::new(CharacterId(2), code("FOX#1")).with_stage(StageId::FINAL_DESTINATION),
    )
    .unwrap();
    b.start_search(
        PlayerSelections::new(CharacterId(9), code("MRTH#9")).with_stage(StageId::BATTLEFIELD),
    )
    .unwrap();
    connect_both(&mut a, &mut b);
    assert!(a.cleanup());
    assert!(b.cleanup());

    assert_eq!(a.local_selections().stage, None);
    assert_eq!(a.local_selections().character, None);
    assert_eq!(a.local_selections().connect_code, Some(code("FOX#1")));

    // Second match: only the character is picked again, no stage
    a.start_search(PlayerSelections {
        character: Some(CharacterId(20)),
        ..Default::default()
    })
    .unwrap();
    b.start_search(
        PlayerSelections::new(CharacterId(9), code("MRTH#9")).with_stage(StageId::BATTLEFIELD),
    )
    .unwrap();
    let (a_session, _) = connect_both(&mut a, &mut b);
    assert_eq!(a_session.local.stage, None);
    assert_eq!(a_session.local.character, Some(CharacterId(20)));
    assert_eq!(a_session.stage, random_stage(a_session.seed));
}

#[test]
fn test_logout_forgets_identity() {
    let broker = LocalBroker::with_seed(1);
    let mut a = negotiator(&broker);
    a.start_search(PlayerSelections::new(CharacterId(2), code("FOX#1")))
        .unwrap();

    a.logout();
    assert_eq!(a.state(), NegotiationState::Disconnected);
    assert_eq!(a.local_selections(), &PlayerSelections::default());
    assert!(matches!(
        a.start_search(PlayerSelections {
            character: Some(CharacterId(2)),
            ..Default::default()
        }),
        Err(NegotiationError::SelectionMismatch(
            SelectionMismatch::MissingConnectCode
        ))
    ));
}
