//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory links, etc.) to be plugged
/// into the transport manager without coupling to a concrete implementation.
/// Methods take `&self` because the receive loop and the tick loop use the socket
/// from different threads.
pub trait DatagramSocket: Send + Sync {
    /// Sends a single datagram to `addr`.
    fn send_datagram(&self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram, blocking up to the socket's read timeout.
    fn receive_datagram<'a>(&self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Sends a datagram to every host on the local network at `port`.
    fn broadcast_datagram(&self, payload: &[u8], port: u16) -> Result<usize>;

    /// Returns the socket address that this socket was created from.
    fn local_addr(&self) -> Result<SocketAddr>;
}
