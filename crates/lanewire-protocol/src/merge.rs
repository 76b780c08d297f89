//! Merged datagrams: several small packets behind one `Merged` tag byte.
//!
//! Each inner packet is stored as `[u16 LE length][packet bytes]`.

use byteorder::{ByteOrder, LittleEndian};

use lanewire_core::{
    constants::{HEADER_SIZE, MERGE_LENGTH_PREFIX},
    error::{DecodingErrorKind, Result},
    packet::{Packet, PacketKind},
    packet_pool::PacketPool,
};

/// Accumulates packets into one merged datagram bounded by the connection MTU.
#[derive(Debug)]
pub struct MergeWriter {
    packet: Packet,
    position: usize,
    count: usize,
}

impl MergeWriter {
    /// Creates a writer producing datagrams of at most `mtu` bytes.
    pub fn new(pool: &PacketPool, mtu: usize) -> Self {
        Self { packet: pool.acquire(PacketKind::Merged, mtu - HEADER_SIZE), position: 0, count: 0 }
    }

    /// Number of packets merged so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns true if `len` more bytes fit behind their length prefix.
    pub fn fits(&self, len: usize) -> bool {
        self.position + MERGE_LENGTH_PREFIX + len <= self.packet.payload().len()
    }

    /// Appends one packet. The caller checks [`MergeWriter::fits`] first.
    pub fn push(&mut self, bytes: &[u8]) {
        debug_assert!(self.fits(bytes.len()));
        let payload = self.packet.payload_mut();
        let start = self.position + MERGE_LENGTH_PREFIX;
        LittleEndian::write_u16(&mut payload[self.position..start], bytes.len() as u16);
        payload[start..start + bytes.len()].copy_from_slice(bytes);
        self.position = start + bytes.len();
        self.count += 1;
    }

    /// Takes the accumulated datagram and resets the writer for `mtu`.
    ///
    /// A single merged packet is returned as itself, without the merge wrapper.
    pub fn finish(&mut self, pool: &PacketPool, mtu: usize) -> Option<Packet> {
        let count = std::mem::replace(&mut self.count, 0);
        let used = std::mem::replace(&mut self.position, 0);
        let fresh = pool.acquire(PacketKind::Merged, mtu - HEADER_SIZE);
        let mut merged = std::mem::replace(&mut self.packet, fresh);

        match count {
            0 => {
                pool.release(merged);
                None
            }
            1 => {
                let single = pool.acquire_from_wire(&merged.payload()[MERGE_LENGTH_PREFIX..used]).ok();
                pool.release(merged);
                single
            }
            _ => {
                merged.truncate(HEADER_SIZE + used);
                Some(merged)
            }
        }
    }

    /// Returns the writer's buffer to the pool.
    pub fn release(self, pool: &PacketPool) {
        pool.release(self.packet);
    }
}

/// Iterates over the inner packets of a merged datagram.
pub fn merged_entries(packet: &Packet) -> MergedEntries<'_> {
    MergedEntries { remaining: packet.payload() }
}

/// Iterator returned by [`merged_entries`].
#[derive(Debug)]
pub struct MergedEntries<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for MergedEntries<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        if self.remaining.len() < MERGE_LENGTH_PREFIX {
            self.remaining = &[];
            return Some(Err(DecodingErrorKind::MergedPayload.into()));
        }
        let len = LittleEndian::read_u16(&self.remaining[..MERGE_LENGTH_PREFIX]) as usize;
        let end = MERGE_LENGTH_PREFIX + len;
        if len == 0 || end > self.remaining.len() {
            self.remaining = &[];
            return Some(Err(DecodingErrorKind::MergedPayload.into()));
        }
        let entry = &self.remaining[MERGE_LENGTH_PREFIX..end];
        self.remaining = &self.remaining[end..];
        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_two_packets() {
        let pool = PacketPool::default();
        let mut writer = MergeWriter::new(&pool, 100);
        writer.push(&[0, b'a']);
        writer.push(&[6, 1, 0]);
        let merged = writer.finish(&pool, 100).unwrap();

        assert_eq!(merged.kind(), PacketKind::Merged);
        assert_eq!(merged.as_bytes(), &[19, 2, 0, 0, b'a', 3, 0, 6, 1, 0]);

        let wire = pool.acquire_from_wire(merged.as_bytes()).unwrap();
        let entries: Vec<_> = merged_entries(&wire).map(|e| e.unwrap().to_vec()).collect();
        assert_eq!(entries, vec![vec![0, b'a'], vec![6, 1, 0]]);
    }

    #[test]
    fn test_single_packet_is_not_wrapped() {
        let pool = PacketPool::default();
        let mut writer = MergeWriter::new(&pool, 100);
        writer.push(&[0, b'z']);
        let single = writer.finish(&pool, 100).unwrap();
        assert_eq!(single.kind(), PacketKind::Unreliable);
        assert_eq!(single.as_bytes(), &[0, b'z']);
        assert!(writer.finish(&pool, 100).is_none());
    }

    #[test]
    fn test_fits_respects_mtu() {
        let pool = PacketPool::default();
        let mut writer = MergeWriter::new(&pool, 11);
        assert!(writer.fits(8));
        assert!(!writer.fits(9));
        writer.push(&[0; 8]);
        assert!(!writer.fits(0));
    }

    #[test]
    fn test_truncated_entry_is_an_error() {
        let pool = PacketPool::default();
        let wire = pool.acquire_from_wire(&[19, 5, 0, 0, 1]).unwrap();
        let mut entries = merged_entries(&wire);
        assert!(entries.next().unwrap().is_err());
        assert!(entries.next().is_none());
    }
}
