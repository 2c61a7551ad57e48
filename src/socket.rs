//! Async UDP endpoint abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` tailored to
//! the poll-loop reactors in [`crate::sender`] and [`crate::receiver`]:
//! outbound it speaks [`crate::packet::Packet`], inbound it hands back the
//! raw datagram plus its source address.  Receiving stays byte-oriented
//! because peer-lock filtering must happen *before* deserialization.
//!
//! All protocol logic lives elsewhere; this module owns only datagram I/O.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::packet::Packet;

/// Receive buffer size.  The largest packet the protocol emits is 1068 bytes
/// (header + full payload + three SACK blocks); anything larger is foreign.
const MAX_DATAGRAM: usize = 2048;

/// An async, non-blocking UDP endpoint.
///
/// All methods take `&self`; the socket is owned by exactly one reactor.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (resolved after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single datagram to `dest`.
    ///
    /// Best-effort: a successful return only means the datagram was handed
    /// to the OS.  Returns the serialized size.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> io::Result<usize> {
        let bytes = packet.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(bytes.len())
    }

    /// Non-blocking receive: the next queued datagram, or `None` when the
    /// queue is empty.
    pub fn try_recv_from(&self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.inner.try_recv_from(&mut buf) {
            Ok((n, addr)) => {
                buf.truncate(n);
                Ok(Some((buf, addr)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
