//! Outgoing datagram staging for one connection.
//!
//! Channels hand their packets to the outbox through [`Outbound`]. With merging enabled, small
//! packets of mergeable kinds are packed into one `Merged` datagram bounded by the MTU; the
//! datagram is closed when the next packet would overflow it and at the end of every tick.

use std::sync::Arc;

use lanewire_core::{packet::Packet, packet_pool::PacketPool};
use lanewire_protocol::{merge::MergeWriter, Outbound};
use tracing::trace;

/// Datagrams ready for the socket, in send order.
#[derive(Debug)]
pub struct Outbox {
    pool: Arc<PacketPool>,
    merger: Option<MergeWriter>,
    mtu: usize,
    ready: Vec<Packet>,
}

impl Outbox {
    /// Creates an outbox for datagrams of at most `mtu` bytes.
    pub fn new(pool: Arc<PacketPool>, mtu: usize, merge_enabled: bool) -> Self {
        let merger = merge_enabled.then(|| MergeWriter::new(&pool, mtu));
        Self { pool, merger, mtu, ready: Vec::new() }
    }

    fn try_merge(&mut self, packet: &Packet) -> bool {
        let Some(merger) = self.merger.as_mut() else {
            return false;
        };
        if !packet.kind().is_mergeable() {
            return false;
        }
        let bytes = packet.as_bytes();
        if !merger.fits(bytes.len()) {
            if let Some(datagram) = merger.finish(&self.pool, self.mtu) {
                trace!("merge buffer full, flushing");
                self.ready.push(datagram);
            }
            if !merger.fits(bytes.len()) {
                return false;
            }
        }
        merger.push(bytes);
        true
    }

    /// Queues a packet for its own datagram, bypassing the merge buffer.
    pub fn send_direct(&mut self, packet: Packet) {
        self.ready.push(packet);
    }

    /// Closes the current merged datagram, if any packet went into it.
    pub fn flush(&mut self) {
        if let Some(merger) = self.merger.as_mut() {
            if let Some(datagram) = merger.finish(&self.pool, self.mtu) {
                self.ready.push(datagram);
            }
        }
    }

    /// Switches to a new MTU, flushing what was merged under the old one.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.flush();
        self.mtu = mtu;
        if let Some(merger) = self.merger.take() {
            merger.release(&self.pool);
            self.merger = Some(MergeWriter::new(&self.pool, mtu));
        }
    }

    /// Takes every datagram ready for the socket.
    pub fn drain(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.ready)
    }

    /// Returns all held buffers to the pool.
    pub fn release_all(&mut self) {
        for packet in self.ready.drain(..) {
            self.pool.release(packet);
        }
        if let Some(merger) = self.merger.take() {
            merger.release(&self.pool);
        }
    }
}

impl Outbound for Outbox {
    fn send_copy(&mut self, packet: &Packet) {
        if !self.try_merge(packet) {
            let copy = self.pool.duplicate(packet);
            self.ready.push(copy);
        }
    }

    fn send_owned(&mut self, packet: Packet) {
        if self.try_merge(&packet) {
            self.pool.release(packet);
        } else {
            self.ready.push(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use lanewire_core::{constants::POSSIBLE_MTU, packet::PacketKind};
    use lanewire_protocol::merge::merged_entries;

    use super::*;

    #[test]
    fn test_without_merging_each_packet_is_a_datagram() {
        let pool = Arc::new(PacketPool::default());
        let mut outbox = Outbox::new(pool.clone(), POSSIBLE_MTU[0], false);
        outbox.send_owned(pool.acquire(PacketKind::Ping, 0));
        let kept = pool.acquire_with_payload(PacketKind::Reliable, b"data");
        outbox.send_copy(&kept);
        outbox.flush();

        let sent = outbox.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload(), b"data");
    }

    #[test]
    fn test_merging_packs_small_packets() {
        let pool = Arc::new(PacketPool::default());
        let mut outbox = Outbox::new(pool.clone(), POSSIBLE_MTU[0], true);
        outbox.send_owned(pool.acquire(PacketKind::Ping, 0));
        outbox.send_owned(pool.acquire_with_payload(PacketKind::Unreliable, b"hello"));
        outbox.send_direct(pool.acquire(PacketKind::Pong, 0));
        outbox.flush();

        let sent = outbox.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), PacketKind::Pong);
        assert_eq!(sent[1].kind(), PacketKind::Merged);
        let entries: Vec<_> = merged_entries(&sent[1]).map(|entry| entry.unwrap().to_vec()).collect();
        assert_eq!(entries, vec![vec![6, 0, 0], vec![0, b'h', b'e', b'l', b'l', b'o']]);
    }

    #[test]
    fn test_merge_overflow_starts_new_datagram() {
        let pool = Arc::new(PacketPool::default());
        let mtu = POSSIBLE_MTU[0];
        let mut outbox = Outbox::new(pool.clone(), mtu, true);
        let big = vec![7u8; mtu / 3];
        for _ in 0..3 {
            outbox.send_owned(pool.acquire_with_payload(PacketKind::Unreliable, &big));
        }
        outbox.flush();

        let sent = outbox.drain();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|packet| packet.len() <= mtu));
        assert_eq!(sent[0].kind(), PacketKind::Merged);
        // Only one packet went into the second datagram, so it is sent unwrapped.
        assert_eq!(sent[1].kind(), PacketKind::Unreliable);
    }

    #[test]
    fn test_unmergeable_kinds_skip_the_buffer() {
        let pool = Arc::new(PacketPool::default());
        let mut outbox = Outbox::new(pool.clone(), POSSIBLE_MTU[0], true);
        outbox.send_owned(pool.acquire(PacketKind::Disconnect, 8));
        assert_eq!(outbox.drain().len(), 1);
    }
}
