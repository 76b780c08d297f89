//! Path MTU (Maximum Transmission Unit) Discovery
//!
//! Connections start at the smallest datagram size in `POSSIBLE_MTU`, which every IPv4 path
//! must carry, and climb the table while the path allows it.
//!
//! # Algorithm
//!
//! - Every `mtu_check_interval` a probe padded to the next tier's size is sent
//! - The remote answers a probe that arrived intact with a confirmation of the same size
//! - On confirmation the connection adopts that tier and the attempt counter resets
//! - After `max_mtu_check_attempts` unanswered probes, or on reaching the last tier,
//!   discovery stops and the MTU is frozen
//!
//! A probe the local socket refuses to send (datagram too large) also ends discovery.

use std::time::Instant;

use lanewire_core::{config::Config, constants::POSSIBLE_MTU};
use tracing::debug;

/// Tracks MTU discovery for a peer connection.
#[derive(Debug)]
pub struct PmtuDiscovery {
    /// Index of the last confirmed tier
    tier: usize,
    /// Probes sent since the last confirmation
    attempts: u32,
    /// Last time a probe was scheduled
    last_check: Instant,
    /// Discovery stopped; the MTU no longer changes
    finished: bool,
    config: Config,
}

impl PmtuDiscovery {
    /// Creates a new discovery state at the smallest tier.
    pub fn new(config: &Config, time: Instant) -> Self {
        Self {
            tier: 0,
            attempts: 0,
            last_check: time,
            finished: !config.mtu_discovery,
            config: config.clone(),
        }
    }

    /// Returns the current path MTU in bytes.
    pub fn mtu(&self) -> usize {
        POSSIBLE_MTU[self.tier]
    }

    /// Returns the index of the current tier.
    pub fn tier(&self) -> usize {
        self.tier
    }

    /// Returns true once discovery has stopped.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops discovery at the current tier.
    pub fn finish(&mut self) {
        if !self.finished {
            debug!("MTU discovery finished at {} bytes", self.mtu());
            self.finished = true;
        }
    }

    /// Handles the probing cadence.
    ///
    /// Returns the tier index to probe when a probe is due.
    pub fn handle_pmtu(&mut self, time: Instant) -> Option<usize> {
        if self.finished {
            return None;
        }
        if time.saturating_duration_since(self.last_check) < self.config.mtu_check_interval {
            return None;
        }
        self.last_check = time;
        self.attempts += 1;
        if self.attempts >= self.config.max_mtu_check_attempts {
            self.finish();
            return None;
        }
        Some(self.tier + 1)
    }

    /// Processes a probe confirmation. Returns true if a larger MTU was adopted.
    pub fn process_reply(&mut self, tier: usize) -> bool {
        if tier <= self.tier || tier >= POSSIBLE_MTU.len() {
            return false;
        }
        self.tier = tier;
        self.attempts = 0;
        debug!("MTU raised to {} bytes", self.mtu());
        if self.tier == POSSIBLE_MTU.len() - 1 {
            self.finish();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_probe_cadence() {
        let config = Config::default();
        let start = Instant::now();
        let mut pmtu = PmtuDiscovery::new(&config, start);

        assert_eq!(pmtu.mtu(), POSSIBLE_MTU[0]);
        assert_eq!(pmtu.handle_pmtu(start + Duration::from_millis(500)), None);
        assert_eq!(pmtu.handle_pmtu(start + Duration::from_millis(1000)), Some(1));
        assert_eq!(pmtu.handle_pmtu(start + Duration::from_millis(1500)), None);
    }

    #[test]
    fn test_reply_adopts_larger_tier() {
        let config = Config::default();
        let start = Instant::now();
        let mut pmtu = PmtuDiscovery::new(&config, start);

        assert!(pmtu.process_reply(1));
        assert_eq!(pmtu.mtu(), POSSIBLE_MTU[1]);
        assert!(!pmtu.process_reply(1));
        assert!(!pmtu.process_reply(0));
        assert!(!pmtu.process_reply(POSSIBLE_MTU.len()));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let config = Config::default();
        let start = Instant::now();
        let mut pmtu = PmtuDiscovery::new(&config, start);

        let mut probes = 0;
        for step in 1..=10u64 {
            if pmtu.handle_pmtu(start + Duration::from_secs(step)).is_some() {
                probes += 1;
            }
        }
        assert_eq!(probes, config.max_mtu_check_attempts - 1);
        assert!(pmtu.is_finished());
        assert_eq!(pmtu.mtu(), POSSIBLE_MTU[0]);
    }

    #[test]
    fn test_last_tier_finishes() {
        let config = Config::default();
        let mut pmtu = PmtuDiscovery::new(&config, Instant::now());
        assert!(pmtu.process_reply(POSSIBLE_MTU.len() - 1));
        assert!(pmtu.is_finished());
    }

    #[test]
    fn test_disabled_discovery() {
        let mut config = Config::default();
        config.mtu_discovery = false;
        let start = Instant::now();
        let mut pmtu = PmtuDiscovery::new(&config, start);
        assert!(pmtu.is_finished());
        assert_eq!(pmtu.handle_pmtu(start + Duration::from_secs(5)), None);
    }
}
