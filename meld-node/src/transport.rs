//! UDP datagram transport.
//!
//! One bound socket per replica, used by the listener and for gossip
//! fan-out. There is no framing and no reliability: one datagram is one
//! envelope, send failures are the caller's to log, and receives use a
//! short timeout so shutdown stays responsive.

use crate::config::PeerAddr;
use crate::{NodeError, NodeResult};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// A bound UDP socket.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Binds to `addr`. Bind failure is fatal at start.
    pub async fn bind(addr: &str) -> NodeResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| NodeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { socket })
    }

    /// The locally bound address (useful when binding port 0 in tests).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one datagram to a configured peer.
    pub async fn send_to_peer(&self, payload: &[u8], peer: &PeerAddr) -> NodeResult<()> {
        self.socket
            .send_to(payload, (peer.host.as_str(), peer.port))
            .await?;
        Ok(())
    }

    /// Sends one datagram to a raw address (ack replies).
    pub async fn send_to_addr(&self, payload: &[u8], addr: SocketAddr) -> NodeResult<()> {
        self.socket.send_to(payload, addr).await?;
        Ok(())
    }

    /// Waits up to `timeout` for one datagram. `None` on timeout.
    pub async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Option<io::Result<(usize, SocketAddr)>> {
        tokio::time::timeout(timeout, self.socket.recv_from(buf))
            .await
            .ok()
    }
}
