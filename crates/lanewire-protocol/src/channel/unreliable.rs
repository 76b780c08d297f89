use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use lanewire_core::{packet::Packet, packet_pool::PacketPool};

use super::{Channel, Outbound};

/// Fire-and-forget channel: FIFO out, immediate delivery in.
#[derive(Debug, Default)]
pub struct UnreliableChannel {
    outgoing: VecDeque<Packet>,
}

impl UnreliableChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Channel for UnreliableChannel {
    fn enqueue_outgoing(&mut self, packet: Packet) {
        self.outgoing.push_back(packet);
    }

    fn try_send_one(&mut self, _now: Instant, _resend_delay: Duration, out: &mut dyn Outbound) -> bool {
        match self.outgoing.pop_front() {
            Some(packet) => {
                out.send_owned(packet);
                true
            }
            None => false,
        }
    }

    fn on_packet_arrived(&mut self, packet: Packet, _pool: &PacketPool, delivered: &mut Vec<Packet>) -> bool {
        delivered.push(packet);
        true
    }

    fn queued(&self) -> usize {
        self.outgoing.len()
    }

    fn release_all(&mut self, pool: &PacketPool) {
        for packet in self.outgoing.drain(..) {
            pool.release(packet);
        }
    }
}
