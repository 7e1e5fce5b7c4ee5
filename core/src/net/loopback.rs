//! In-process peer links
//!
//! A connected pair of links over channels. Messages go through the same
//! framing as the UDP link. A delay, counted in `poll` calls, simulates
//! latency: a controller polls once per step, so a delay of `k` holds each
//! message back by `k` steps.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use super::link::{LinkError, LinkStatus, PeerLink};
use super::messages::PeerMessage;

#[derive(Debug)]
pub struct LoopbackLink {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    /// Delivery delay in polls
    delay: u32,
    polls: u64,
    /// Messages waiting out the delay, with the poll they become due on
    in_flight: VecDeque<(u64, PeerMessage)>,
    peer_gone: bool,
}

impl LoopbackLink {
    /// Two links connected to each other with no delay.
    pub fn pair() -> (LoopbackLink, LoopbackLink) {
        Self::pair_with_delay(0)
    }

    /// Two links whose deliveries each lag by `delay` polls.
    pub fn pair_with_delay(delay: u32) -> (LoopbackLink, LoopbackLink) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self::new(a_tx, a_rx, delay), Self::new(b_tx, b_rx, delay))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>, delay: u32) -> Self {
        Self {
            tx: Some(tx),
            rx,
            delay,
            polls: 0,
            in_flight: VecDeque::new(),
            peer_gone: false,
        }
    }

    fn receive(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => match PeerMessage::from_bytes(&bytes) {
                    Ok(message) => {
                        let due = self.polls + u64::from(self.delay);
                        self.in_flight.push_back((due, message));
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to decode loopback message"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.peer_gone = true;
                    break;
                }
            }
        }
    }
}

impl PeerLink for LoopbackLink {
    fn send(&mut self, message: &PeerMessage) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        tx.send(message.to_bytes()).map_err(|_| LinkError::Closed)
    }

    fn poll(&mut self) -> Vec<PeerMessage> {
        if self.tx.is_none() {
            return Vec::new();
        }
        self.receive();

        let mut ready = Vec::new();
        while let Some((due, _)) = self.in_flight.front() {
            if *due > self.polls {
                break;
            }
            if let Some((_, message)) = self.in_flight.pop_front() {
                ready.push(message);
            }
        }
        self.polls += 1;
        ready
    }

    fn status(&self) -> LinkStatus {
        // Messages still in flight are delivered before the loss shows
        if self.tx.is_none() || (self.peer_gone && self.in_flight.is_empty()) {
            LinkStatus::Disconnected
        } else {
            LinkStatus::Connected
        }
    }

    fn close(&mut self) {
        self.tx = None;
        self.in_flight.clear();
    }
}
