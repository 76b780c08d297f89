//! RTT-bucketed send-rate governor.
//!
//! The configured flow modes form a ladder ordered by ascending start RTT; mode 0 is the
//! fastest. Each RTT sample either counts toward a streak of good samples (average RTT below
//! the previous mode's start RTT) or, when the average climbs above the current mode's start
//! RTT, immediately drops one mode. A streak longer than `flow_increase_threshold` climbs one
//! mode back up.
//!
//! The budget is measured over `flow_update_interval`: per tick a connection may send its
//! mode's packet rate scaled to the tick length, capped by what is left in the current window.
//! With no modes configured sending is unlimited.

use std::time::{Duration, Instant};

use lanewire_core::config::{Config, FlowMode};
use tracing::debug;

/// Send-rate governor state for one connection.
#[derive(Debug, Clone)]
pub struct FlowControl {
    modes: Vec<FlowMode>,
    current_mode: usize,
    good_rtt_count: u32,
    increase_threshold: u32,
    update_interval: Duration,
    window_start: Instant,
    sent_in_window: u32,
}

impl FlowControl {
    /// Creates a governor in the fastest mode.
    pub fn new(config: &Config, time: Instant) -> Self {
        Self {
            modes: config.flow_modes.clone(),
            current_mode: 0,
            good_rtt_count: 0,
            increase_threshold: config.flow_increase_threshold,
            update_interval: config.flow_update_interval,
            window_start: time,
            sent_in_window: 0,
        }
    }

    /// Returns the index of the current mode.
    pub fn current_mode(&self) -> usize {
        self.current_mode
    }

    fn start_rtt(&self, mode: usize) -> f64 {
        self.modes.get(mode).map_or(0.0, |m| f64::from(m.start_rtt))
    }

    /// Folds a new average RTT into the mode selection.
    pub fn on_rtt_sample(&mut self, avg_rtt: f64) {
        if self.modes.is_empty() {
            return;
        }
        let faster_start = match self.current_mode.checked_sub(1) {
            Some(faster) => self.start_rtt(faster),
            None => 0.0,
        };
        if avg_rtt < faster_start {
            self.good_rtt_count += 1;
            if self.good_rtt_count > self.increase_threshold {
                self.good_rtt_count = 0;
                self.current_mode -= 1;
                debug!("flow mode raised to {}", self.current_mode);
            }
        } else if avg_rtt > self.start_rtt(self.current_mode) {
            self.good_rtt_count = 0;
            if self.current_mode + 1 < self.modes.len() {
                self.current_mode += 1;
                debug!("flow mode lowered to {}", self.current_mode);
            }
        }
    }

    /// Returns how many packets may be sent this tick.
    ///
    /// `elapsed` is the time since the previous tick.
    pub fn budget(&mut self, time: Instant, elapsed: Duration) -> usize {
        if time.saturating_duration_since(self.window_start) >= self.update_interval {
            self.window_start = time;
            self.sent_in_window = 0;
        }
        let Some(mode) = self.modes.get(self.current_mode) else {
            return usize::MAX;
        };
        let available = mode.packets_per_second.saturating_sub(self.sent_in_window);
        let per_tick = (f64::from(mode.packets_per_second) * elapsed.as_secs_f64()
            / self.update_interval.as_secs_f64())
        .ceil() as u32;
        available.min(per_tick) as usize
    }

    /// Records packets sent against the current window.
    pub fn record_sent(&mut self, count: usize) {
        self.sent_in_window = self.sent_in_window.saturating_add(count as u32);
    }
}
