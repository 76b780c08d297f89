//! Peer connection statistics tracking.
//!
//! Counts datagrams and bytes in both directions plus reliable retransmissions,
//! which serve as the packet loss indicator.

/// Statistics for a peer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    /// Datagrams sent to this peer
    pub packets_sent: u64,
    /// Datagrams received from this peer
    pub packets_received: u64,
    /// Reliable packets sent again after their resend delay expired
    pub packets_lost: u64,
    /// Bytes sent to this peer, headers included
    pub bytes_sent: u64,
    /// Bytes received from this peer, headers included
    pub bytes_received: u64,
}

impl PeerStatistics {
    /// Returns the packet loss rate (0.0 to 1.0).
    pub fn packet_loss_rate(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_lost as f32 / self.packets_sent as f32
    }

    /// Adds another set of counters to this one.
    pub fn accumulate(&mut self, other: &PeerStatistics) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.packets_lost += other.packets_lost;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.packets_sent = self.packets_sent.saturating_add(1);
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.packets_received = self.packets_received.saturating_add(1);
        self.bytes_received = self.bytes_received.saturating_add(bytes as u64);
    }
}
