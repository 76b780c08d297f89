use std::{default::Default, time::Duration};

use crate::constants::{DEFAULT_WINDOW_SIZE, MAX_PACKET_SIZE, PROTOCOL_ID};

/// One tier of the RTT-bucketed send-rate governor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowMode {
    /// Average RTT (ms) at or above which this tier applies.
    pub start_rtt: u32,
    /// Packets a connection may send per flow window while in this tier.
    pub packets_per_second: u32,
}

impl FlowMode {
    /// Creates a new flow tier.
    pub fn new(start_rtt: u32, packets_per_second: u32) -> Self {
        Self { start_rtt, packets_per_second }
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Maximum number of live connections the manager admits.
    pub max_connections: usize,
    /// Shared application key every connect request must present.
    pub connect_key: String,
    /// Protocol identifier carried in connect requests.
    pub protocol_id: u32,
    /// Interval of the periodic maintenance tick.
    pub update_interval: Duration,
    /// Interval between pings on a connected peer.
    pub ping_interval: Duration,
    /// Interval after which the RTT accumulator collapses to its average.
    pub rtt_reset_interval: Duration,
    /// Silence after which a connection is dropped with a timeout.
    pub disconnect_timeout: Duration,
    /// Delay between connect request retries.
    pub reconnect_delay: Duration,
    /// Connect requests sent before the attempt fails.
    pub max_connect_attempts: u32,
    /// Capacity of each reliable channel's sliding window. Rounded down to a power of two no
    /// larger than `MAX_SEQUENCE / 4`.
    pub window_size: u16,
    /// Sends of one reliable packet without an ack before the connection is dropped.
    pub max_resend_attempts: u32,
    /// Constant part of the reliable resend delay in milliseconds.
    pub resend_base_delay_ms: f64,
    /// Multiplier applied to the average RTT in the resend delay.
    pub resend_rtt_multiplier: f64,
    /// Floor applied to the average RTT before computing the resend delay.
    pub min_avg_rtt_ms: f64,
    /// Probe for a larger path MTU after connecting.
    pub mtu_discovery: bool,
    /// Delay between MTU probes.
    pub mtu_check_interval: Duration,
    /// Unanswered probes before discovery freezes at the last confirmed MTU.
    pub max_mtu_check_attempts: u32,
    /// Send-rate tiers, ordered by ascending `start_rtt`. Empty means unlimited.
    pub flow_modes: Vec<FlowMode>,
    /// Consecutive good RTT samples needed to step up one flow tier.
    pub flow_increase_threshold: u32,
    /// Window over which the per-tier packet budget is measured.
    pub flow_update_interval: Duration,
    /// Merge small outgoing packets into one datagram per tick.
    pub merge_enabled: bool,
    /// Dispatch events immediately on the producing thread instead of queueing them.
    pub unsynced_events: bool,
    /// Age after which an incomplete fragment assembly is discarded.
    pub fragment_timeout: Duration,
    /// Number of free buffers the packet pool keeps around.
    pub packet_pool_capacity: usize,
    /// Buffers larger than this are dropped instead of returned to the pool.
    pub max_pooled_packet_size: usize,
    /// Size of the buffer datagrams are received into.
    pub receive_buffer_size: usize,
    /// Read timeout of the receive loop, so it can observe shutdown.
    pub socket_polling_timeout: Option<Duration>,
    /// Socket receive buffer size (SO_RCVBUF). None uses OS default.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size (SO_SNDBUF). None uses OS default.
    pub socket_send_buffer_size: Option<usize>,
    /// IP Time-To-Live (TTL) for outgoing packets. None uses OS default.
    pub socket_ttl: Option<u32>,
    /// Enable broadcast mode on the socket (SO_BROADCAST).
    pub socket_broadcast: bool,
    /// Randomly drop inbound datagrams.
    pub simulate_packet_loss: bool,
    /// Percentage (0-100) of inbound datagrams dropped when loss is simulated.
    pub packet_loss_chance: u32,
    /// Randomly delay inbound datagrams.
    pub simulate_latency: bool,
    /// Lower bound of simulated latency.
    pub simulation_min_latency: Duration,
    /// Upper bound of simulated latency.
    pub simulation_max_latency: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 1,
            connect_key: String::new(),
            protocol_id: PROTOCOL_ID,
            update_interval: Duration::from_millis(15),
            ping_interval: Duration::from_millis(1000),
            rtt_reset_interval: Duration::from_millis(1000),
            disconnect_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(500),
            max_connect_attempts: 10,
            window_size: DEFAULT_WINDOW_SIZE,
            max_resend_attempts: 100,
            resend_base_delay_ms: 25.0,
            resend_rtt_multiplier: 2.1,
            min_avg_rtt_ms: 0.1,
            mtu_discovery: true,
            mtu_check_interval: Duration::from_millis(1000),
            max_mtu_check_attempts: 4,
            flow_modes: Vec::new(),
            flow_increase_threshold: 4,
            flow_update_interval: Duration::from_millis(1000),
            merge_enabled: false,
            unsynced_events: false,
            fragment_timeout: Duration::from_secs(5),
            packet_pool_capacity: 1000,
            max_pooled_packet_size: 1432, // largest common ethernet tier
            receive_buffer_size: MAX_PACKET_SIZE,
            socket_polling_timeout: Some(Duration::from_millis(100)),
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
            socket_broadcast: false,
            simulate_packet_loss: false,
            packet_loss_chance: 10,
            simulate_latency: false,
            simulation_min_latency: Duration::from_millis(30),
            simulation_max_latency: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Computes the adaptive resend delay for a given average RTT.
    pub fn resend_delay_ms(&self, avg_rtt_ms: f64) -> f64 {
        let avg_rtt = avg_rtt_ms.max(self.min_avg_rtt_ms);
        self.resend_base_delay_ms + avg_rtt * self.resend_rtt_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resend_delay() {
        let config = Config::default();
        assert!((config.resend_delay_ms(0.0) - 25.21).abs() < 1e-9);
        assert!((config.resend_delay_ms(100.0) - 235.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_timings() {
        let config = Config::default();
        assert_eq!(config.disconnect_timeout, Duration::from_millis(5000));
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_connect_attempts, 10);
        assert_eq!(config.window_size, 64);
        assert_eq!(config.max_resend_attempts, 100);
        assert!(config.flow_modes.is_empty());
    }
}
