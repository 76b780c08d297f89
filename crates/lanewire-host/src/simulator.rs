//! Inbound network fault simulation for debugging.
//!
//! | Fault   | Description                                                           |
//! |---------|-----------------------------------------------------------------------|
//! | Loss    | Drop a datagram with probability `packet_loss_chance` percent.        |
//! | Latency | Hold a datagram for a random delay between the configured bounds.     |
//!
//! Held datagrams are released by the manager's tick once their delivery time has passed.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use lanewire_core::config::Config;
use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

#[derive(Debug)]
struct DelayedDatagram {
    payload: Vec<u8>,
    from: SocketAddr,
    deliver_at: Instant,
}

/// What to do with an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Process it now.
    Deliver,
    /// Pretend it never arrived.
    Drop,
    /// It was stored and comes back later.
    Delayed,
}

/// Applies simulated loss and latency to inbound datagrams.
#[derive(Debug)]
pub struct NetworkSimulator {
    loss: Option<u32>,
    latency: Option<(Duration, Duration)>,
    delayed: Mutex<Vec<DelayedDatagram>>,
}

impl NetworkSimulator {
    /// Creates a simulator from the simulation knobs of `config`.
    pub fn new(config: &Config) -> Self {
        let latency = config.simulate_latency.then(|| {
            let min = config.simulation_min_latency;
            (min, config.simulation_max_latency.max(min))
        });
        Self {
            loss: config.simulate_packet_loss.then_some(config.packet_loss_chance.min(100)),
            latency,
            delayed: Mutex::new(Vec::new()),
        }
    }

    /// Returns true if any fault is simulated.
    pub fn is_active(&self) -> bool {
        self.loss.is_some() || self.latency.is_some()
    }

    /// Decides the fate of an inbound datagram, storing it if it is delayed.
    pub fn intercept(&self, payload: &[u8], from: SocketAddr, time: Instant) -> Verdict {
        let mut rng = rand::thread_rng();
        if let Some(chance) = self.loss {
            if rng.gen_range(0..100) < chance {
                trace!("simulated loss of {} bytes from {}", payload.len(), from);
                return Verdict::Drop;
            }
        }
        if let Some((min, max)) = self.latency {
            let delay = if max > min { rng.gen_range(min..=max) } else { min };
            self.delayed.lock().push(DelayedDatagram { payload: payload.to_vec(), from, deliver_at: time + delay });
            return Verdict::Delayed;
        }
        Verdict::Deliver
    }

    /// Removes and returns every held datagram due at `time`, oldest delivery time first.
    pub fn take_due(&self, time: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut delayed = self.delayed.lock();
        let mut due: Vec<DelayedDatagram> = Vec::new();
        let mut index = 0;
        while index < delayed.len() {
            if delayed[index].deliver_at <= time {
                due.push(delayed.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|datagram| datagram.deliver_at);
        due.into_iter().map(|datagram| (datagram.payload, datagram.from)).collect()
    }

    /// Number of datagrams currently held back.
    pub fn delayed_count(&self) -> usize {
        self.delayed.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_inactive_by_default() {
        let simulator = NetworkSimulator::new(&Config::default());
        assert!(!simulator.is_active());
        assert_eq!(simulator.intercept(b"x", from(), Instant::now()), Verdict::Deliver);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let mut config = Config::default();
        config.simulate_packet_loss = true;
        config.packet_loss_chance = 100;
        let simulator = NetworkSimulator::new(&config);
        for _ in 0..20 {
            assert_eq!(simulator.intercept(b"x", from(), Instant::now()), Verdict::Drop);
        }
    }

    #[test]
    fn test_latency_holds_until_due() {
        let mut config = Config::default();
        config.simulate_latency = true;
        config.simulation_min_latency = Duration::from_millis(30);
        config.simulation_max_latency = Duration::from_millis(100);
        let simulator = NetworkSimulator::new(&config);
        let start = Instant::now();

        assert_eq!(simulator.intercept(b"late", from(), start), Verdict::Delayed);
        assert!(simulator.take_due(start + Duration::from_millis(29)).is_empty());
        let due = simulator.take_due(start + Duration::from_millis(100));
        assert_eq!(due, vec![(b"late".to_vec(), from())]);
        assert_eq!(simulator.delayed_count(), 0);
    }
}
