//! UDP peer link
//!
//! Non-blocking UDP socket bound to one remote endpoint, carrying framed
//! [`PeerMessage`]s. Datagrams from any other address are ignored.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use super::link::{LinkError, LinkStatus, PeerLink};
use super::messages::PeerMessage;

/// Buffer size for incoming packets
const RECV_BUFFER_SIZE: usize = 8192;

/// Silence from the peer after which the link reports itself disconnected
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UdpPeerLink {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote: SocketAddr,
    recv_buf: Vec<u8>,
    last_received: Instant,
    disconnect_timeout: Duration,
    closed: bool,
}

impl UdpPeerLink {
    /// Bind `local` and talk to `remote`.
    ///
    /// # Arguments
    ///
    /// * `local` - Address to bind to (e.g., "0.0.0.0:0")
    /// * `remote` - Peer endpoint
    pub fn bind(local: &str, remote: SocketAddr) -> Result<Self, LinkError> {
        let local_addr: SocketAddr = local
            .parse()
            .map_err(|_| LinkError::AddressParse(local.to_string()))?;
        let socket = UdpSocket::bind(local_addr).map_err(|source| LinkError::Bind {
            addr: local.to_string(),
            source,
        })?;
        Self::from_socket(socket, remote)
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: UdpSocket, remote: SocketAddr) -> Result<Self, LinkError> {
        let local_addr = socket.local_addr().map_err(|source| LinkError::Bind {
            addr: "<socket>".to_string(),
            source,
        })?;
        socket.set_nonblocking(true).map_err(|source| LinkError::Bind {
            addr: local_addr.to_string(),
            source,
        })?;

        tracing::debug!(port = local_addr.port(), %remote, "UdpPeerLink bound");

        Ok(Self {
            socket,
            local_addr,
            remote,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            last_received: Instant::now(),
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            closed: false,
        })
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn timed_out(&self) -> bool {
        self.last_received.elapsed() >= self.disconnect_timeout
    }
}

impl PeerLink for UdpPeerLink {
    fn send(&mut self, message: &PeerMessage) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        let bytes = message.to_bytes();
        self.socket
            .send_to(&bytes, self.remote)
            .map_err(LinkError::Send)?;
        tracing::trace!(?message, "sent peer message");
        Ok(())
    }

    fn poll(&mut self) -> Vec<PeerMessage> {
        let mut messages = Vec::new();
        if self.closed {
            return messages;
        }

        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((len, from)) => {
                    if from != self.remote {
                        tracing::trace!(%from, "ignoring datagram from unknown peer");
                        continue;
                    }
                    match PeerMessage::from_bytes(&self.recv_buf[..len]) {
                        Ok(message) => {
                            self.last_received = Instant::now();
                            messages.push(message);
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to decode peer message"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "receive error");
                    break;
                }
            }
        }
        messages
    }

    fn status(&self) -> LinkStatus {
        if self.closed || self.timed_out() {
            LinkStatus::Disconnected
        } else {
            LinkStatus::Connected
        }
    }

    fn close(&mut self) {
        if !self.closed {
            tracing::debug!(remote = %self.remote, "closing UdpPeerLink");
            self.closed = true;
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{GoodbyeReason, InputPacket};

    fn pair() -> (UdpPeerLink, UdpPeerLink) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        (
            UdpPeerLink::from_socket(a, b_addr).unwrap(),
            UdpPeerLink::from_socket(b, a_addr).unwrap(),
        )
    }

    fn poll_until(link: &mut UdpPeerLink, count: usize) -> Vec<PeerMessage> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = Vec::new();
        while received.len() < count && Instant::now() < deadline {
            received.extend(link.poll());
            std::thread::sleep(Duration::from_millis(1));
        }
        received
    }

    #[test]
    fn test_send_and_poll() {
        let (mut a, mut b) = pair();
        let input = PeerMessage::Input(InputPacket {
            start_step: 3,
            frames: vec![vec![0xAB; 8]],
            ack: Some(2),
        });
        a.send(&input).unwrap();
        a.send(&PeerMessage::Goodbye(GoodbyeReason::Quit)).unwrap();

        let received = poll_until(&mut b, 2);
        assert_eq!(
            received,
            vec![input, PeerMessage::Goodbye(GoodbyeReason::Quit)]
        );
        assert_eq!(b.status(), LinkStatus::Connected);
    }

    #[test]
    fn test_ignores_strangers_and_garbage() {
        let (mut a, _b) = pair();
        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        stranger
            .send_to(
                &PeerMessage::Goodbye(GoodbyeReason::Quit).to_bytes(),
                a.local_addr(),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_close_and_timeout() {
        let (a, mut b) = pair();
        let mut a = a.with_disconnect_timeout(Duration::ZERO);
        assert_eq!(a.status(), LinkStatus::Disconnected);

        b.close();
        b.close();
        assert_eq!(b.status(), LinkStatus::Disconnected);
        assert!(matches!(
            b.send(&PeerMessage::Goodbye(GoodbyeReason::Quit)),
            Err(LinkError::Closed)
        ));
        assert!(a.poll().is_empty());
    }
}
