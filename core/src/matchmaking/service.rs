//! Matchmaking service seam and the in-process broker

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rollsync_shared::ConnectCode;

use super::types::{OpponentInfo, SearchPoll, ServiceError};
use crate::net::{LinkError, LoopbackLink, PeerLink};

/// Client side of a matchmaking server.
///
/// Only the client-visible behavior matters here: start a search, poll it
/// until an opponent is found, then open a link to that opponent.
pub trait MatchmakingService: Send {
    fn begin_search(&mut self, code: &ConnectCode) -> Result<(), ServiceError>;

    fn poll(&mut self) -> SearchPoll;

    fn connect(&mut self, opponent: &OpponentInfo) -> Result<Box<dyn PeerLink>, LinkError>;

    /// Abandon the current search. Idempotent.
    fn cancel(&mut self);
}

type Ticket = u64;

struct Pairing {
    opponent: OpponentInfo,
    link: Option<LoopbackLink>,
}

struct BrokerState {
    next_ticket: Ticket,
    waiting: Option<(Ticket, ConnectCode)>,
    matches: HashMap<Ticket, Pairing>,
    rng: Pcg32,
    /// Loopback delay handed to every pair
    link_delay: u32,
}

/// Pairs searching clients in the same process, first come first served.
///
/// The first searcher gets port 1. Shared seeds come from a generator seeded
/// at construction, so a broker built with [`LocalBroker::with_seed`] hands
/// out the same seeds every run.
#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                next_ticket: 0,
                waiting: None,
                matches: HashMap::new(),
                rng: Pcg32::seed_from_u64(seed),
                link_delay: 0,
            })),
        }
    }

    /// Delay, in polls, applied to links between matched clients.
    pub fn with_link_delay(self, delay: u32) -> Self {
        self.lock().link_delay = delay;
        self
    }

    /// A client of this broker.
    pub fn client(&self) -> LocalMatchmaking {
        LocalMatchmaking {
            broker: self.clone(),
            ticket: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MatchmakingService`] backed by a [`LocalBroker`].
pub struct LocalMatchmaking {
    broker: LocalBroker,
    ticket: Option<Ticket>,
}

impl MatchmakingService for LocalMatchmaking {
    fn begin_search(&mut self, code: &ConnectCode) -> Result<(), ServiceError> {
        self.cancel();
        let mut state = self.broker.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        self.ticket = Some(ticket);

        let Some((other_ticket, other_code)) = state.waiting.take() else {
            state.waiting = Some((ticket, code.clone()));
            tracing::debug!(%code, "waiting for opponent");
            return Ok(());
        };

        let seed: u64 = state.rng.random();
        let (first_link, second_link) = LoopbackLink::pair_with_delay(state.link_delay);
        state.matches.insert(
            other_ticket,
            Pairing {
                opponent: OpponentInfo {
                    remote_code: code.clone(),
                    endpoint: None,
                    local_port: 1,
                    seed,
                },
                link: Some(first_link),
            },
        );
        state.matches.insert(
            ticket,
            Pairing {
                opponent: OpponentInfo {
                    remote_code: other_code.clone(),
                    endpoint: None,
                    local_port: 2,
                    seed,
                },
                link: Some(second_link),
            },
        );
        tracing::debug!(port1 = %other_code, port2 = %code, seed, "paired");
        Ok(())
    }

    fn poll(&mut self) -> SearchPoll {
        let Some(ticket) = self.ticket else {
            return SearchPoll::Failed(ServiceError::NotSearching.to_string());
        };
        match self.broker.lock().matches.get(&ticket) {
            Some(pairing) => SearchPoll::Found(pairing.opponent.clone()),
            None => SearchPoll::Pending,
        }
    }

    fn connect(&mut self, _opponent: &OpponentInfo) -> Result<Box<dyn PeerLink>, LinkError> {
        let ticket = self.ticket.ok_or(LinkError::Closed)?;
        let mut state = self.broker.lock();
        let link = state
            .matches
            .get_mut(&ticket)
            .and_then(|pairing| pairing.link.take())
            .ok_or(LinkError::Closed)?;
        Ok(Box::new(link))
    }

    fn cancel(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let mut state = self.broker.lock();
        if state.waiting.as_ref().is_some_and(|(waiting, _)| *waiting == ticket) {
            state.waiting = None;
        }
        state.matches.remove(&ticket);
    }
}

impl Drop for LocalMatchmaking {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> ConnectCode {
        ConnectCode::parse(s).unwrap()
    }

    #[test]
    fn test_pairs_first_two_searchers() {
        let broker = LocalBroker::with_seed(1);
        let mut a = broker.client();
        let mut b = broker.client();

        a.begin_search(&code("AAA#1")).unwrap();
        assert_eq!(a.poll(), SearchPoll::Pending);
        b.begin_search(&code("BBB#2")).unwrap();

        let (SearchPoll::Found(for_a), SearchPoll::Found(for_b)) = (a.poll(), b.poll()) else {
            panic!("expected both clients to be paired");
        };
        assert_eq!(for_a.local_port, 1);
        assert_eq!(for_b.local_port, 2);
        assert_eq!(for_a.seed, for_b.seed);
        assert_eq!(for_a.remote_code, code("BBB#2"));

        assert!(a.connect(&for_a).is_ok());
        assert!(matches!(a.connect(&for_a), Err(LinkError::Closed)));
    }

    #[test]
    fn test_seeds_are_deterministic() {
        let seed_of = |broker: LocalBroker| {
            let mut a = broker.client();
            let mut b = broker.client();
            a.begin_search(&code("AAA#1")).unwrap();
            b.begin_search(&code("BBB#2")).unwrap();
            match a.poll() {
                SearchPoll::Found(info) => info.seed,
                other => panic!("unexpected {other:?}"),
            }
        };
        assert_eq!(
            seed_of(LocalBroker::with_seed(5)),
            seed_of(LocalBroker::with_seed(5))
        );
    }

    #[test]
    fn test_cancel_leaves_queue() {
        let broker = LocalBroker::with_seed(1);
        let mut a = broker.client();
        let mut b = broker.client();
        let mut c = broker.client();

        a.begin_search(&code("AAA#1")).unwrap();
        a.cancel();
        a.cancel();
        assert!(matches!(a.poll(), SearchPoll::Failed(_)));

        b.begin_search(&code("BBB#2")).unwrap();
        c.begin_search(&code("CCC#3")).unwrap();
        assert!(matches!(b.poll(), SearchPoll::Found(info) if info.remote_code == code("CCC#3")));
    }
}
