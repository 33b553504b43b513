//! UdpTransport - connectionless transport, one datagram per envelope.
//!
//! No buffering beyond the socket's, no retransmission, no ordering guarantee.
//! Datagrams addressed to a strand other than the one being received are dropped.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::domain::{Msg, TransportError};
use crate::ports::Transport;

/// Conservative payload size that fits a typical ethernet MTU.
pub const DEFAULT_MAX_DATAGRAM: usize = 1400;

/// Largest datagram a UDP socket can hand us.
const RECV_BUFFER: usize = 65_536;

pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    max_datagram: usize,
}

impl UdpTransport {
    /// Bind `local` and send every envelope to `peer`.
    pub async fn bind(
        local: impl ToSocketAddrs,
        peer: SocketAddr,
        max_datagram: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(socket, peer, max_datagram))
    }

    pub fn from_socket(socket: UdpSocket, peer: SocketAddr, max_datagram: usize) -> Self {
        Self {
            socket,
            peer,
            max_datagram: max_datagram.clamp(1, RECV_BUFFER),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_message(&self, msg: &Msg) -> Result<(), TransportError> {
        let data = serde_json::to_vec(msg)?;
        if data.len() > self.max_datagram {
            return Err(TransportError::PacketTooLarge {
                size: data.len(),
                limit: self.max_datagram,
            });
        }

        if let Err(err) = self.socket.send_to(&data, self.peer).await {
            tracing::error!(strand = msg.strand(), peer = %self.peer, error = %err, "udp send failed");
            return Err(err.into());
        }
        tracing::debug!(strand = msg.strand(), msg_id = msg.id(), "message sent via udp");
        Ok(())
    }

    async fn receive_message(&self, strand: &str) -> Result<Msg, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await.map_err(|err| {
                tracing::warn!(strand, error = %err, "udp receive error");
                err
            })?;

            let msg: Msg = serde_json::from_slice(&buf[..n]).map_err(|err| {
                tracing::warn!(strand, %from, error = %err, "invalid udp message format");
                err
            })?;

            if msg.strand() != strand {
                tracing::debug!(strand, got = msg.strand(), %from, "dropping datagram for another strand");
                continue;
            }

            tracing::debug!(strand, msg_id = msg.id(), %from, "message received via udp");
            return Ok(msg);
        }
    }

    fn preserves_order(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn pair() -> (UdpTransport, UdpTransport) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        (
            UdpTransport::from_socket(a, b_addr, DEFAULT_MAX_DATAGRAM),
            UdpTransport::from_socket(b, a_addr, DEFAULT_MAX_DATAGRAM),
        )
    }

    #[tokio::test]
    async fn datagram_round_trip() {
        let (a, b) = pair().await;
        a.send_message(&Msg::new("1", "events", "hello", 7))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), b.receive_message("events"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload(), "hello");
        assert_eq!(got.timestamp(), 7);
        assert!(!a.preserves_order());
    }

    #[tokio::test]
    async fn other_strands_are_skipped() {
        let (a, b) = pair().await;
        a.send_message(&Msg::new("1", "noise", "skip me", 0))
            .await
            .unwrap();
        a.send_message(&Msg::new("2", "events", "keep me", 0))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), b.receive_message("events"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload(), "keep me");
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let (a, _b) = pair().await;
        let big = "x".repeat(DEFAULT_MAX_DATAGRAM);
        let err = a
            .send_message(&Msg::new("1", "events", big, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PacketTooLarge { .. }));
    }
}
