//! Fragment reassembly.
//!
//! Large reliable payloads arrive as a run of fragments sharing one fragment id. Each fragment
//! is held (as the pooled packet it arrived in) until the last missing one shows up; the
//! payloads are then concatenated in index order and every fragment buffer goes back to the
//! pool.
//!
//! A fragment whose index is already filled, or whose declared count disagrees with the rest of
//! its run, is a protocol error: the whole entry is dropped instead of waiting on state that can
//! no longer complete correctly.
//!
//! Memory follows what actually arrived: an entry only holds the fragments received so far,
//! whatever count the header declares, and a connection keeps at most `max_entries` incomplete
//! entries. A fragment opening one more entry past that is dropped.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use lanewire_core::{
    error::{DecodingErrorKind, ErrorKind, Result},
    packet::Packet,
    packet_pool::PacketPool,
};
use tracing::warn;

/// Fragments received so far for one fragment id.
#[derive(Debug)]
struct AssemblyEntry {
    fragments: BTreeMap<u16, Packet>,
    total: u16,
    total_bytes: usize,
    created_at: Instant,
}

impl AssemblyEntry {
    fn new(total: u16, created_at: Instant) -> Self {
        Self { fragments: BTreeMap::new(), total, total_bytes: 0, created_at }
    }

    fn release(self, pool: &PacketPool) {
        for packet in self.fragments.into_values() {
            pool.release(packet);
        }
    }
}

/// Per-connection reassembly of fragmented payloads, keyed by fragment id.
#[derive(Debug)]
pub struct FragmentAssembler {
    entries: HashMap<u16, AssemblyEntry>,
    timeout: Duration,
    max_entries: usize,
}

impl FragmentAssembler {
    /// Creates an assembler discarding incomplete entries older than `timeout` and holding at
    /// most `max_entries` of them at once.
    pub fn new(timeout: Duration, max_entries: usize) -> Self {
        Self { entries: HashMap::new(), timeout, max_entries }
    }

    /// Number of fragment ids with an incomplete entry.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Stores one fragment. Returns the reassembled payload once the run is complete.
    pub fn insert(&mut self, packet: Packet, pool: &PacketPool, time: Instant) -> Result<Option<Vec<u8>>> {
        let id = packet.fragment_id();
        let part = packet.fragment_part();
        let total = packet.fragment_total();

        if part >= total {
            pool.release(packet);
            return Err(DecodingErrorKind::FragmentHeader.into());
        }
        if !self.entries.contains_key(&id) && self.entries.len() >= self.max_entries {
            warn!("dropping fragment of message {}: {} messages already incomplete", id, self.entries.len());
            pool.release(packet);
            return Err(ErrorKind::TooManyAssemblies(self.entries.len()));
        }

        let entry = self.entries.entry(id).or_insert_with(|| AssemblyEntry::new(total, time));
        if entry.total != total || entry.fragments.contains_key(&part) {
            pool.release(packet);
            if let Some(entry) = self.entries.remove(&id) {
                entry.release(pool);
            }
            return Err(DecodingErrorKind::FragmentHeader.into());
        }

        entry.total_bytes += packet.payload().len();
        entry.fragments.insert(part, packet);
        if entry.fragments.len() < usize::from(total) {
            return Ok(None);
        }

        let Some(entry) = self.entries.remove(&id) else {
            return Ok(None);
        };
        let mut payload = Vec::with_capacity(entry.total_bytes);
        for packet in entry.fragments.into_values() {
            payload.extend_from_slice(packet.payload());
            pool.release(packet);
        }
        Ok(Some(payload))
    }

    /// Discards entries that have been incomplete for longer than the timeout.
    pub fn cleanup_stale(&mut self, pool: &PacketPool, time: Instant) {
        let timeout = self.timeout;
        let stale: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| time.saturating_duration_since(entry.created_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        if stale.is_empty() {
            return;
        }
        warn!("Cleaning up {} stale fragment buffer(s) that timed out after {:?}", stale.len(), timeout);
        for id in stale {
            if let Some(entry) = self.entries.remove(&id) {
                entry.release(pool);
            }
        }
    }

    /// Returns every held fragment to the pool.
    pub fn release_all(&mut self, pool: &PacketPool) {
        for (_, entry) in self.entries.drain() {
            entry.release(pool);
        }
    }
}
