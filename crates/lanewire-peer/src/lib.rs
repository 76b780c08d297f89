#![warn(missing_docs)]

//! lanewire-peer: connection state machine for one remote endpoint.

/// RTT-bucketed send-rate governor.
pub mod flow_control;
/// Reassembly of fragmented payloads.
pub mod fragment_buffer;
mod outbox;
mod peer;
mod peer_event;
mod peer_state;
/// Path MTU discovery.
pub mod pmtu_discovery;
/// Ping scheduling and RTT averaging.
pub mod rtt;
mod statistics;

pub use peer::Peer;
pub use peer_event::{Action, PeerEvent};
pub use peer_state::{DisconnectReason, PeerState};
pub use statistics::PeerStatistics;
