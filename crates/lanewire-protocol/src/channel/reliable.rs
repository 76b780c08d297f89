//! Reliable delivery over a sliding window, ordered or unordered.
//!
//! # Sending
//!
//! Queued packets enter the outgoing window as long as fewer than `window_size` packets are in
//! flight; each gets the next local sequence number and the slot `sequence % window_size`.
//! [`Channel::try_send_one`] sends the first slot that was never sent or whose last send is older
//! than the resend delay. A slot is emptied when an ack covers it, and the window start moves
//! forward over every empty slot. A slot that was sent `resend_limit` times without an ack is not
//! sent again: the channel reports [`ReliableChannel::resend_limit_reached`] and stops sending.
//!
//! Slots are addressed by `sequence % window_size`, so the window size is rounded down to a power
//! of two no larger than `MAX_SEQUENCE / 4`. Any other size would map the sequences on both sides
//! of the wrap from `MAX_SEQUENCE - 1` to `0` onto the wrong slots.
//!
//! # Receiving
//!
//! The receiver keeps a bitmap of the sequences it got inside its window and answers with that
//! bitmap (window start in the sequence field) after every tick in which data arrived. A packet
//! between `window_size` and `2 * window_size` ahead of the window start slides the window;
//! anything further ahead or behind it is dropped. The ordered variant holds early packets in a
//! reorder buffer until the gap before them is filled.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use lanewire_core::{
    constants::MAX_SEQUENCE,
    packet::{Packet, PacketKind, SequenceNumber},
    packet_pool::PacketPool,
};
use tracing::{trace, warn};

use super::{Channel, Outbound};
use crate::sequence::{advance, is_valid, next, relative};

/// Largest usable window: the receive side accepts sequences up to two windows ahead, which must
/// stay within half the sequence space.
pub const MAX_WINDOW_SIZE: u16 = MAX_SEQUENCE / 4;

#[derive(Debug, Default)]
struct PendingSlot {
    packet: Option<Packet>,
    last_sent: Option<Instant>,
    attempts: u32,
}

/// Rounds `requested` down to a power of two in `1..=MAX_WINDOW_SIZE`.
fn usable_window_size(requested: u16) -> u16 {
    let clamped = requested.clamp(1, MAX_WINDOW_SIZE);
    1 << (u16::BITS - 1 - clamped.leading_zeros())
}

/// Reliable channel; ordered or unordered depending on construction.
#[derive(Debug)]
pub struct ReliableChannel {
    ordered: bool,
    window_size: u16,
    outgoing: VecDeque<Packet>,

    pending: Vec<PendingSlot>,
    local_sequence: SequenceNumber,
    local_window_start: SequenceNumber,

    remote_sequence: SequenceNumber,
    remote_window_start: SequenceNumber,
    acks: Vec<u8>,
    held: Vec<Option<Packet>>,
    early_received: Vec<bool>,
    must_send_acks: bool,

    resends: u64,
    resend_limit: u32,
    resend_limit_reached: bool,
}

impl ReliableChannel {
    /// Creates a channel with a window of `window_size` slots, rounded down to a usable size.
    ///
    /// Packets are resent without limit until [`ReliableChannel::with_resend_limit`] sets one.
    pub fn new(ordered: bool, window_size: u16) -> Self {
        let requested = window_size;
        let window_size = usable_window_size(requested);
        if window_size != requested {
            warn!("reliable window size {} is unusable, using {}", requested, window_size);
        }
        let size = window_size as usize;
        Self {
            ordered,
            window_size,
            outgoing: VecDeque::new(),
            pending: (0..size).map(|_| PendingSlot::default()).collect(),
            local_sequence: 0,
            local_window_start: 0,
            remote_sequence: 0,
            remote_window_start: 0,
            acks: vec![0; (size + 7) / 8],
            held: if ordered { (0..size).map(|_| None).collect() } else { Vec::new() },
            early_received: if ordered { Vec::new() } else { vec![false; size] },
            must_send_acks: false,
            resends: 0,
            resend_limit: u32::MAX,
            resend_limit_reached: false,
        }
    }

    /// Caps how often one packet is sent before the channel gives up on it.
    pub fn with_resend_limit(mut self, limit: u32) -> Self {
        self.resend_limit = limit.max(1);
        self
    }

    /// Number of slots in the window.
    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    /// Returns true once a packet was sent `resend_limit` times without being acknowledged.
    pub fn resend_limit_reached(&self) -> bool {
        self.resend_limit_reached
    }

    /// Returns true if this channel delivers in send order.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Kind of the data packets this channel carries.
    pub fn data_kind(&self) -> PacketKind {
        if self.ordered {
            PacketKind::ReliableOrdered
        } else {
            PacketKind::Reliable
        }
    }

    /// Kind of the ack packets this channel exchanges.
    pub fn ack_kind(&self) -> PacketKind {
        if self.ordered {
            PacketKind::AckReliableOrdered
        } else {
            PacketKind::AckReliable
        }
    }

    /// Packets sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.pending.iter().filter(|slot| slot.packet.is_some()).count()
    }

    /// Number of retransmissions performed so far.
    pub fn resends(&self) -> u64 {
        self.resends
    }

    /// Start of the outgoing window.
    pub fn local_window_start(&self) -> SequenceNumber {
        self.local_window_start
    }

    fn slot(&self, sequence: SequenceNumber) -> usize {
        (sequence % self.window_size) as usize
    }

    fn ack_bit(&self, sequence: SequenceNumber) -> (usize, u8) {
        let slot = self.slot(sequence);
        (slot / 8, 1 << (slot % 8))
    }

    /// Sends the ack bitmap if data arrived since the last one went out.
    pub fn send_acks(&mut self, pool: &PacketPool, out: &mut dyn Outbound) {
        if !self.must_send_acks {
            return;
        }
        self.must_send_acks = false;
        let mut packet = pool.acquire(self.ack_kind(), self.acks.len());
        packet.set_sequence(self.remote_window_start);
        packet.payload_mut().copy_from_slice(&self.acks);
        out.send_owned(packet);
    }

    /// Applies an ack packet from the remote receiver, releasing acknowledged slots.
    pub fn process_ack(&mut self, packet: Packet, pool: &PacketPool) {
        let ack_window_start = packet.sequence();
        if packet.payload().len() != self.acks.len() || !is_valid(ack_window_start) {
            warn!("dropping malformed ack ({} bytes)", packet.len());
            pool.release(packet);
            return;
        }

        let window_relative = relative(self.local_window_start, ack_window_start);
        if window_relative < 0 || window_relative >= i32::from(self.window_size) {
            trace!("dropping outdated ack for window {}", ack_window_start);
            pool.release(packet);
            return;
        }

        let mut sequence = self.local_window_start;
        while sequence != self.local_sequence {
            if relative(sequence, ack_window_start) >= i32::from(self.window_size) {
                break;
            }
            let (byte, bit) = self.ack_bit(sequence);
            if packet.payload()[byte] & bit != 0 {
                let slot = self.slot(sequence);
                if let Some(acked) = self.pending[slot].packet.take() {
                    pool.release(acked);
                }
                self.pending[slot].last_sent = None;
                self.pending[slot].attempts = 0;
            }
            sequence = next(sequence);
        }
        pool.release(packet);

        while self.local_window_start != self.local_sequence {
            let slot = self.slot(self.local_window_start);
            if self.pending[slot].packet.is_some() {
                break;
            }
            self.local_window_start = next(self.local_window_start);
        }
    }

    fn fill_window(&mut self) {
        while relative(self.local_sequence, self.local_window_start) < i32::from(self.window_size) {
            let Some(mut packet) = self.outgoing.pop_front() else {
                break;
            };
            packet.set_sequence(self.local_sequence);
            let slot = self.slot(self.local_sequence);
            self.pending[slot] = PendingSlot { packet: Some(packet), last_sent: None, attempts: 0 };
            self.local_sequence = next(self.local_sequence);
        }
    }

    fn slide_receive_window(&mut self, distance: i32, pool: &PacketPool) {
        let shift = (distance - i32::from(self.window_size) + 1) as u16;
        let new_start = advance(self.remote_window_start, shift);
        while self.remote_window_start != new_start {
            let (byte, bit) = self.ack_bit(self.remote_window_start);
            self.acks[byte] &= !bit;
            let slot = self.slot(self.remote_window_start);
            if self.ordered {
                if let Some(stale) = self.held[slot].take() {
                    pool.release(stale);
                }
            } else {
                self.early_received[slot] = false;
            }
            self.remote_window_start = next(self.remote_window_start);
        }
    }
}

impl Channel for ReliableChannel {
    fn enqueue_outgoing(&mut self, packet: Packet) {
        self.outgoing.push_back(packet);
    }

    fn try_send_one(&mut self, now: Instant, resend_delay: Duration, out: &mut dyn Outbound) -> bool {
        if self.resend_limit_reached {
            return false;
        }
        self.fill_window();

        let mut sequence = self.local_window_start;
        while sequence != self.local_sequence {
            let slot = self.slot(sequence);
            let pending = &mut self.pending[slot];
            if let Some(packet) = pending.packet.as_ref() {
                let due = match pending.last_sent {
                    None => true,
                    Some(sent) => now.saturating_duration_since(sent) >= resend_delay,
                };
                if due {
                    if pending.attempts >= self.resend_limit {
                        warn!("reliable packet {} unacknowledged after {} sends", sequence, pending.attempts);
                        self.resend_limit_reached = true;
                        return false;
                    }
                    if pending.last_sent.is_some() {
                        trace!("resending reliable packet {}", sequence);
                        self.resends += 1;
                    }
                    pending.last_sent = Some(now);
                    pending.attempts += 1;
                    out.send_copy(packet);
                    return true;
                }
            }
            sequence = next(sequence);
        }
        false
    }

    fn on_packet_arrived(&mut self, packet: Packet, pool: &PacketPool, delivered: &mut Vec<Packet>) -> bool {
        let sequence = packet.sequence();
        let window = i32::from(self.window_size);
        let from_window_start = relative(sequence, self.remote_window_start);

        if !is_valid(sequence)
            || relative(sequence, self.remote_sequence) > window
            || from_window_start < 0
            || from_window_start >= window * 2
        {
            trace!("dropping reliable packet {} outside window {}", sequence, self.remote_window_start);
            pool.release(packet);
            return false;
        }

        if from_window_start >= window {
            self.slide_receive_window(from_window_start, pool);
        }

        self.must_send_acks = true;
        let (byte, bit) = self.ack_bit(sequence);
        if self.acks[byte] & bit != 0 {
            trace!("dropping duplicate reliable packet {}", sequence);
            pool.release(packet);
            return false;
        }
        self.acks[byte] |= bit;

        if sequence == self.remote_sequence {
            delivered.push(packet);
            self.remote_sequence = next(self.remote_sequence);
            if self.ordered {
                loop {
                    let slot = self.slot(self.remote_sequence);
                    let Some(held) = self.held[slot].take() else {
                        break;
                    };
                    delivered.push(held);
                    self.remote_sequence = next(self.remote_sequence);
                }
            } else {
                loop {
                    let slot = self.slot(self.remote_sequence);
                    if !self.early_received[slot] {
                        break;
                    }
                    self.early_received[slot] = false;
                    self.remote_sequence = next(self.remote_sequence);
                }
            }
            return true;
        }

        let slot = self.slot(sequence);
        if self.ordered {
            self.held[slot] = Some(packet);
        } else {
            self.early_received[slot] = true;
            delivered.push(packet);
        }
        true
    }

    fn queued(&self) -> usize {
        self.outgoing.len()
    }

    fn release_all(&mut self, pool: &PacketPool) {
        for packet in self.outgoing.drain(..) {
            pool.release(packet);
        }
        for slot in self.pending.iter_mut() {
            if let Some(packet) = slot.packet.take() {
                pool.release(packet);
            }
        }
        for held in self.held.iter_mut() {
            if let Some(packet) = held.take() {
                pool.release(packet);
            }
        }
    }
}
