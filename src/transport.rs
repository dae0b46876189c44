//! Datagram sources and UDP plumbing
//!
//! The multiplexer only needs two things from a socket: a readiness wait and a
//! non-blocking receive. [`DatagramSource`] captures exactly that so the
//! drain logic runs the same against real UDP sockets and in-memory queues.

use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::{Result, TelemetryError};

/// Datagram that asks the drone to start streaming on a port.
pub const HANDSHAKE: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// A readable datagram endpoint.
#[async_trait::async_trait]
pub trait DatagramSource: Send + Sync + 'static {
    /// Wait until a receive is likely to succeed. May wake spuriously.
    async fn readable(&self) -> io::Result<()>;

    /// Receive one datagram without blocking.
    ///
    /// Returns `ErrorKind::WouldBlock` when nothing is queued.
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait::async_trait]
impl DatagramSource for tokio::net::UdpSocket {
    async fn readable(&self) -> io::Result<()> {
        tokio::net::UdpSocket::readable(self).await
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::UdpSocket::try_recv_from(self, buf).map(|(len, _from)| len)
    }
}

#[async_trait::async_trait]
impl<S: DatagramSource + ?Sized> DatagramSource for Arc<S> {
    async fn readable(&self) -> io::Result<()> {
        (**self).readable().await
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).try_recv(buf)
    }
}

/// Outcome of draining a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Length of the retained (most recent) datagram, at the front of the buffer.
    pub len: usize,
    /// Older datagrams read and thrown away.
    pub discarded: usize,
}

/// Read until the source reports `WouldBlock`, keeping only the last datagram.
///
/// Returns `Ok(None)` when nothing was queued. Any error other than
/// `WouldBlock` (or `Interrupted`, which is retried) is returned as is.
pub fn drain_latest<S>(source: &S, buf: &mut [u8]) -> io::Result<Option<Drained>>
where
    S: DatagramSource + ?Sized,
{
    let mut latest: Option<Drained> = None;

    loop {
        match source.try_recv(buf) {
            Ok(len) => {
                trace!(len, "Datagram read");
                latest = Some(match latest {
                    Some(prev) => Drained { len, discarded: prev.discarded + 1 },
                    None => Drained { len, discarded: 0 },
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(latest),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Bind a non-blocking UDP socket.
pub fn bind_udp(local: SocketAddr) -> Result<StdUdpSocket> {
    let socket = StdUdpSocket::bind(local)
        .map_err(|e| TelemetryError::transport(format!("bind {}", local), e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TelemetryError::transport(format!("set non-blocking on {}", local), e))?;

    debug!(requested = %local, bound = ?socket.local_addr().ok(), "UDP socket bound");
    Ok(socket)
}

/// Ask the drone to start pushing datagrams to this socket.
///
/// Sent once; there is no acknowledgement and no retry.
pub fn send_handshake(socket: &StdUdpSocket, remote: SocketAddr) -> Result<()> {
    let sent = socket
        .send_to(&HANDSHAKE, remote)
        .map_err(|e| TelemetryError::transport(format!("handshake to {}", remote), e))?;
    if sent != HANDSHAKE.len() {
        return Err(TelemetryError::transport(
            format!("handshake to {}", remote),
            io::Error::new(io::ErrorKind::WriteZero, "short handshake datagram"),
        ));
    }

    info!(%remote, "Handshake sent");
    Ok(())
}
