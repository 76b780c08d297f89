use lanewire_core::packet::Packet;
use lanewire_protocol::DeliveryMethod;

use crate::peer_state::DisconnectReason;

/// Something a connection reports to its manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The handshake completed.
    Connected,
    /// The connection reached its terminal state.
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
        /// Application data carried by a remote disconnect, empty otherwise.
        data: Vec<u8>,
    },
    /// A complete application payload arrived.
    Received {
        /// Channel the payload arrived on.
        method: DeliveryMethod,
        /// Payload bytes, reassembled if it was fragmented.
        payload: Vec<u8>,
    },
    /// A pong refreshed the smoothed RTT; carries half of it in milliseconds.
    LatencyUpdated(u32),
}

/// Instructions from a connection to the manager driving it.
#[derive(Debug)]
pub enum Action {
    /// Send this datagram to the connection's remote endpoint, then return it to the pool.
    Send(Packet),
    /// Report this event to the application.
    Emit(PeerEvent),
}
