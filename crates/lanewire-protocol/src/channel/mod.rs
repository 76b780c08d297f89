//! Delivery channels multiplexed over one connection.
//!
//! Each connection owns one channel per [`DeliveryMethod`](crate::delivery::DeliveryMethod).
//! The connection's tick drains a channel by calling [`Channel::try_send_one`] until it reports
//! that nothing is left to send (or the send-rate budget is spent), and routes inbound data
//! packets through [`Channel::on_packet_arrived`].

use std::time::{Duration, Instant};

use lanewire_core::{packet::Packet, packet_pool::PacketPool};

mod reliable;
mod sequenced;
mod unreliable;

pub use reliable::{ReliableChannel, MAX_WINDOW_SIZE};
pub use sequenced::SequencedChannel;
pub use unreliable::UnreliableChannel;

/// Destination for packets a channel transmits.
pub trait Outbound {
    /// Transmits a packet the channel keeps for possible retransmission.
    fn send_copy(&mut self, packet: &Packet);

    /// Transmits a packet the channel is done with.
    fn send_owned(&mut self, packet: Packet);
}

/// Common surface of the delivery channels.
pub trait Channel: Send {
    /// Queues a fully framed data packet for transmission.
    fn enqueue_outgoing(&mut self, packet: Packet);

    /// Sends at most one packet. Returns false when there is nothing to send right now.
    fn try_send_one(&mut self, now: Instant, resend_delay: Duration, out: &mut dyn Outbound) -> bool;

    /// Handles an inbound data packet, appending packets ready for the application to `delivered`.
    ///
    /// Returns false if the packet was dropped.
    fn on_packet_arrived(&mut self, packet: Packet, pool: &PacketPool, delivered: &mut Vec<Packet>) -> bool;

    /// Number of packets waiting in the outgoing queue.
    fn queued(&self) -> usize;

    /// Returns every buffer the channel still holds to the pool.
    fn release_all(&mut self, pool: &PacketPool);
}
