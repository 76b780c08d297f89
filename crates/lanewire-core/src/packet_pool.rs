//! Pool of reusable packet buffers.
//!
//! The pool is shared between the receive path and the tick path, so the free list sits behind a
//! lock. Buffers leave the pool wrapped in an owned [`Packet`] and only come back through
//! [`PacketPool::release`], which consumes the handle.

use std::convert::TryFrom;

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    constants::MAX_PACKET_SIZE,
    error::{DecodingErrorKind, Result},
    packet::{split_tag, tag_byte, Packet, PacketKind},
};

/// Thread-safe pool of packet buffers.
#[derive(Debug)]
pub struct PacketPool {
    /// Free buffers ready for reuse
    free: Mutex<Vec<Vec<u8>>>,
    /// Maximum number of free buffers kept
    capacity: usize,
    /// Buffers with a larger capacity are dropped on release
    max_pooled_size: usize,
}

impl PacketPool {
    /// Creates a new pool.
    pub fn new(capacity: usize, max_pooled_size: usize) -> Self {
        Self { free: Mutex::new(Vec::with_capacity(capacity)), capacity, max_pooled_size }
    }

    fn take_buffer(&self, len: usize) -> Vec<u8> {
        let mut buffer = self.free.lock().pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    /// Acquires a zeroed packet of `kind` with room for `payload_size` bytes after the header.
    pub fn acquire(&self, kind: PacketKind, payload_size: usize) -> Packet {
        let mut buffer = self.take_buffer(kind.header_size(false) + payload_size);
        buffer[0] = tag_byte(kind, false);
        Packet::from_buffer(kind, buffer)
    }

    /// Acquires a zeroed fragment of `kind` with room for `payload_size` bytes.
    ///
    /// `kind` must be one of the reliable data kinds.
    pub fn acquire_fragment(&self, kind: PacketKind, payload_size: usize) -> Packet {
        debug_assert!(kind.can_fragment());
        let mut buffer = self.take_buffer(kind.header_size(true) + payload_size);
        buffer[0] = tag_byte(kind, true);
        Packet::from_buffer(kind, buffer)
    }

    /// Acquires a packet of `kind` and copies `payload` behind the header.
    pub fn acquire_with_payload(&self, kind: PacketKind, payload: &[u8]) -> Packet {
        let mut packet = self.acquire(kind, payload.len());
        packet.payload_mut().copy_from_slice(payload);
        packet
    }

    /// Copies a packet into a fresh buffer, for transmitting while the original stays queued.
    pub fn duplicate(&self, packet: &Packet) -> Packet {
        let mut buffer = self.take_buffer(packet.len());
        buffer.copy_from_slice(packet.as_bytes());
        Packet::from_buffer(packet.kind(), buffer)
    }

    /// Validates a received datagram and copies it into a pooled packet.
    pub fn acquire_from_wire(&self, bytes: &[u8]) -> Result<Packet> {
        let tag = *bytes.first().ok_or(DecodingErrorKind::EmptyPacket)?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(DecodingErrorKind::PacketSize.into());
        }

        let (kind_bits, fragmented) = split_tag(tag);
        let kind = PacketKind::try_from(kind_bits)?;
        if fragmented && !kind.can_fragment() {
            return Err(DecodingErrorKind::FragmentedKind.into());
        }
        if bytes.len() < kind.header_size(fragmented) {
            return Err(DecodingErrorKind::PacketSize.into());
        }

        let mut buffer = self.take_buffer(bytes.len());
        buffer.copy_from_slice(bytes);
        let packet = Packet::from_buffer(kind, buffer);

        if fragmented && packet.fragment_part() >= packet.fragment_total() {
            self.release(packet);
            return Err(DecodingErrorKind::FragmentHeader.into());
        }
        Ok(packet)
    }

    /// Returns a packet's buffer to the pool.
    pub fn release(&self, packet: Packet) {
        let buffer = packet.into_buffer();
        if buffer.capacity() > self.max_pooled_size {
            trace!("dropping oversized buffer of {} bytes", buffer.capacity());
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }

    /// Returns the number of free buffers currently pooled.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Drops all pooled buffers.
    pub fn clear(&self) {
        self.free.lock().clear();
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(1000, MAX_PACKET_SIZE)
    }
}
