//! Events reported to the application.

use std::{io, net::SocketAddr};

use lanewire_peer::DisconnectReason;
use lanewire_protocol::DeliveryMethod;

/// Events emitted by the transport manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A connection finished its handshake.
    PeerConnected(SocketAddr),
    /// A connection ended and was removed from the live set.
    PeerDisconnected {
        /// Remote endpoint of the connection.
        addr: SocketAddr,
        /// Why the connection ended.
        reason: DisconnectReason,
        /// Application data carried by a remote disconnect.
        data: Vec<u8>,
    },
    /// An application payload arrived.
    DataReceived {
        /// Remote endpoint that sent it.
        addr: SocketAddr,
        /// Channel it arrived on.
        method: DeliveryMethod,
        /// The payload, reassembled if it was fragmented.
        payload: Vec<u8>,
    },
    /// The smoothed latency (half the round-trip time) of a connection changed.
    LatencyUpdated {
        /// Remote endpoint of the connection.
        addr: SocketAddr,
        /// Latency in milliseconds.
        latency_ms: u32,
    },
    /// The socket failed; `addr` is set when the failure concerns one endpoint.
    NetworkError {
        /// Endpoint involved, if known.
        addr: Option<SocketAddr>,
        /// Kind of the underlying I/O error.
        error: io::ErrorKind,
    },
}

impl NetEvent {
    /// Returns the endpoint this event concerns, if any.
    pub fn address(&self) -> Option<SocketAddr> {
        match self {
            NetEvent::PeerConnected(addr)
            | NetEvent::PeerDisconnected { addr, .. }
            | NetEvent::DataReceived { addr, .. }
            | NetEvent::LatencyUpdated { addr, .. } => Some(*addr),
            NetEvent::NetworkError { addr, .. } => *addr,
        }
    }
}
