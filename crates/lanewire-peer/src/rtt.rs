//! Ping scheduling and round-trip time accumulation.

use std::time::{Duration, Instant};

use lanewire_core::packet::SequenceNumber;
use lanewire_protocol::sequence;

/// Running RTT average fed by ping/pong exchanges.
#[derive(Debug, Clone)]
pub struct RoundTrip {
    sum: f64,
    count: u32,
    avg: f64,
    ping_sequence: SequenceNumber,
    ping_sent_at: Option<Instant>,
    last_ping: Instant,
    last_reset: Instant,
}

impl RoundTrip {
    /// Creates an empty accumulator; the first ping goes out one interval after `time`.
    pub fn new(time: Instant) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            avg: 0.0,
            ping_sequence: 0,
            ping_sent_at: None,
            last_ping: time,
            last_reset: time,
        }
    }

    /// Smoothed RTT in milliseconds; zero until the first pong.
    pub fn avg_rtt(&self) -> f64 {
        self.avg
    }

    /// Returns the sequence of the next ping when one is due.
    ///
    /// Starting a new ping abandons any pong still outstanding for the previous one.
    pub fn due_ping(&mut self, time: Instant, interval: Duration) -> Option<SequenceNumber> {
        if time.saturating_duration_since(self.last_ping) < interval {
            return None;
        }
        self.last_ping = time;
        self.ping_sequence = sequence::next(self.ping_sequence);
        self.ping_sent_at = Some(time);
        Some(self.ping_sequence)
    }

    /// Folds in the pong for the outstanding ping and returns the new average.
    pub fn on_pong(&mut self, sequence: SequenceNumber, time: Instant) -> Option<f64> {
        if sequence != self.ping_sequence {
            return None;
        }
        let sent_at = self.ping_sent_at.take()?;
        let rtt = time.saturating_duration_since(sent_at).as_secs_f64() * 1000.0;
        self.sum += rtt;
        self.count += 1;
        self.avg = self.sum / f64::from(self.count);
        Some(self.avg)
    }

    /// Collapses the accumulator to one sample of the current average every `interval`.
    pub fn maybe_reset(&mut self, time: Instant, interval: Duration) {
        if time.saturating_duration_since(self.last_reset) < interval {
            return;
        }
        self.last_reset = time;
        if self.count > 0 {
            self.sum = self.avg;
            self.count = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_ping_cadence_and_sequence() {
        let start = Instant::now();
        let mut rtt = RoundTrip::new(start);
        assert_eq!(rtt.due_ping(start, SECOND), None);
        assert_eq!(rtt.due_ping(start + SECOND, SECOND), Some(1));
        assert_eq!(rtt.due_ping(start + SECOND, SECOND), None);
        assert_eq!(rtt.due_ping(start + SECOND * 2, SECOND), Some(2));
    }

    #[test]
    fn test_pong_must_match_outstanding_ping() {
        let start = Instant::now();
        let mut rtt = RoundTrip::new(start);
        let sequence = rtt.due_ping(start + SECOND, SECOND).unwrap();

        assert_eq!(rtt.on_pong(sequence.wrapping_add(1), start + SECOND), None);
        let avg = rtt.on_pong(sequence, start + SECOND + Duration::from_millis(40)).unwrap();
        assert!((avg - 40.0).abs() < 1e-6);
        // A replayed pong is not counted twice.
        assert_eq!(rtt.on_pong(sequence, start + SECOND * 2), None);
    }

    #[test]
    fn test_average_and_reset() {
        let start = Instant::now();
        let mut rtt = RoundTrip::new(start);

        let first = rtt.due_ping(start + SECOND, SECOND).unwrap();
        rtt.on_pong(first, start + SECOND + Duration::from_millis(20));
        let second = rtt.due_ping(start + SECOND * 2, SECOND).unwrap();
        rtt.on_pong(second, start + SECOND * 2 + Duration::from_millis(40));
        assert!((rtt.avg_rtt() - 30.0).abs() < 1e-6);

        rtt.maybe_reset(start + SECOND * 2, SECOND);
        let third = rtt.due_ping(start + SECOND * 3, SECOND).unwrap();
        rtt.on_pong(third, start + SECOND * 3 + Duration::from_millis(90));
        // The reset collapsed 20 and 40 into a single sample of 30.
        assert!((rtt.avg_rtt() - 60.0).abs() < 1e-6);
    }
}
