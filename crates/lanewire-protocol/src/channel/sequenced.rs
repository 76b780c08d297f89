use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use lanewire_core::{
    packet::{Packet, SequenceNumber},
    packet_pool::PacketPool,
};
use tracing::trace;

use super::{Channel, Outbound};
use crate::sequence::{is_valid, next, relative};

/// Latest-wins channel: anything not strictly newer than the last delivered packet is dropped.
#[derive(Debug, Default)]
pub struct SequencedChannel {
    outgoing: VecDeque<Packet>,
    local_sequence: SequenceNumber,
    remote_sequence: SequenceNumber,
}

impl SequencedChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Channel for SequencedChannel {
    fn enqueue_outgoing(&mut self, packet: Packet) {
        self.outgoing.push_back(packet);
    }

    fn try_send_one(&mut self, _now: Instant, _resend_delay: Duration, out: &mut dyn Outbound) -> bool {
        let Some(mut packet) = self.outgoing.pop_front() else {
            return false;
        };
        self.local_sequence = next(self.local_sequence);
        packet.set_sequence(self.local_sequence);
        out.send_owned(packet);
        true
    }

    fn on_packet_arrived(&mut self, packet: Packet, pool: &PacketPool, delivered: &mut Vec<Packet>) -> bool {
        let sequence = packet.sequence();
        if is_valid(sequence) && relative(sequence, self.remote_sequence) > 0 {
            self.remote_sequence = sequence;
            delivered.push(packet);
            true
        } else {
            trace!("dropping stale sequenced packet {} (latest {})", sequence, self.remote_sequence);
            pool.release(packet);
            false
        }
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
