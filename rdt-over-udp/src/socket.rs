//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! whole datagrams.  It deliberately speaks raw bytes rather than
//! [`crate::frame::Frame`]: the relay forwards frames it never fully decodes,
//! and the shutdown token is not a frame.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and address resolution.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;

use crate::frame::Endpoint;

/// Receive buffer size.  Larger than a frame so that over-long datagrams
/// are seen at full length and rejected by the codec.
const MAX_DATAGRAM: usize = 2048;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame's embedded host/port did not resolve to an address.
    #[error("cannot resolve {0}")]
    Unresolvable(String),
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks behind
/// an `Arc`.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `datagram` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(bytes, sender_address)`.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Take every datagram already queued on the socket, without waiting.
    pub fn drain_queued(&self) -> Result<Vec<(Vec<u8>, SocketAddr)>, SocketError> {
        let mut queued = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.inner.try_recv_from(&mut buf) {
                Ok((n, addr)) => queued.push((buf[..n].to_vec(), addr)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(queued),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive the next datagram, giving up at `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline passes first.
    pub async fn recv_until(
        &self,
        deadline: Instant,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        match tokio::time::timeout_at(deadline, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

/// Resolve a frame's embedded endpoint to a socket address.
///
/// Numeric hosts are parsed in place; only names go to the system resolver.
pub async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, SocketError> {
    if let Ok(ip) = endpoint.host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, endpoint.port));
    }
    lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|_| SocketError::Unresolvable(endpoint.to_string()))?
        .next()
        .ok_or_else(|| SocketError::Unresolvable(endpoint.to_string()))
}
