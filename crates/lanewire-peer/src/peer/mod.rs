use std::{
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use lanewire_core::{
    config::Config,
    constants::CONNECTION_ID_SIZE,
    error::{ErrorKind, Result},
    packet::PacketKind,
    packet_pool::PacketPool,
};
use lanewire_protocol::{
    messages::{self, ConnectRequest},
    Channel, DeliveryMethod, Outbound, ReliableChannel, SequencedChannel, UnreliableChannel,
};
use tracing::{debug, warn};

use crate::{
    flow_control::FlowControl,
    fragment_buffer::FragmentAssembler,
    outbox::Outbox,
    peer_event::{Action, PeerEvent},
    peer_state::{DisconnectReason, PeerState},
    pmtu_discovery::PmtuDiscovery,
    rtt::RoundTrip,
    statistics::PeerStatistics,
};

mod fragmenter;
mod packet_processor;

/// Connection state machine for one remote endpoint.
///
/// A peer never touches the socket. Every operation returns the [`Action`]s the manager has to
/// carry out: datagrams to send and events to report. Buffers the peer still holds when it is
/// dropped go back to the shared pool.
pub struct Peer {
    /// The address of the remote endpoint
    remote_address: SocketAddr,
    /// Current connection state
    state: PeerState,
    /// Nonce identifying this connection; the newer of both sides' ids wins
    connection_id: i64,
    config: Config,
    pool: Arc<PacketPool>,

    unreliable: UnreliableChannel,
    sequenced: SequencedChannel,
    reliable_unordered: ReliableChannel,
    reliable_ordered: ReliableChannel,

    /// Reassembly of incoming fragmented payloads
    fragments: FragmentAssembler,
    /// Id given to the next outgoing fragmented payload
    next_fragment_id: u16,

    round_trip: RoundTrip,
    flow: FlowControl,
    pmtu: PmtuDiscovery,
    outbox: Outbox,
    events: Vec<PeerEvent>,
    statistics: PeerStatistics,

    /// Last time any datagram arrived from the remote
    last_heard: Instant,
    /// Time of the previous maintenance tick
    last_update: Instant,
    /// Connect requests sent so far
    connect_attempts: u32,
    /// Last time a connect request went out
    last_connect_attempt: Instant,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("remote_address", &self.remote_address)
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("mtu", &self.pmtu.mtu())
            .field("avg_rtt", &self.round_trip.avg_rtt())
            .finish()
    }
}

/// Nanoseconds since the Unix epoch.
fn time_based_connection_id() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_nanos() as i64)
}

impl Peer {
    fn new(
        remote_address: SocketAddr,
        config: &Config,
        pool: Arc<PacketPool>,
        state: PeerState,
        connection_id: i64,
        time: Instant,
    ) -> Self {
        let pmtu = PmtuDiscovery::new(config, time);
        let reliable_unordered =
            ReliableChannel::new(false, config.window_size).with_resend_limit(config.max_resend_attempts);
        let reliable_ordered =
            ReliableChannel::new(true, config.window_size).with_resend_limit(config.max_resend_attempts);
        // Each reliable channel has at most one window of messages partly delivered, plus the one
        // straddling the window end.
        let max_assemblies = 2 * (usize::from(reliable_ordered.window_size()) + 1);
        Self {
            remote_address,
            state,
            connection_id,
            config: config.clone(),
            outbox: Outbox::new(pool.clone(), pmtu.mtu(), config.merge_enabled),
            pool,
            unreliable: UnreliableChannel::new(),
            sequenced: SequencedChannel::new(),
            reliable_unordered,
            reliable_ordered,
            fragments: FragmentAssembler::new(config.fragment_timeout, max_assemblies),
            next_fragment_id: 0,
            round_trip: RoundTrip::new(time),
            flow: FlowControl::new(config, time),
            pmtu,
            events: Vec::new(),
            statistics: PeerStatistics::default(),
            last_heard: time,
            last_update: time,
            connect_attempts: 0,
            last_connect_attempt: time,
        }
    }

    /// Starts a connection to `remote_address`; the first connect request is among the actions.
    ///
    /// Fails if the connect request for `config.connect_key` does not fit into the smallest MTU.
    pub fn connect(
        remote_address: SocketAddr,
        config: &Config,
        pool: Arc<PacketPool>,
        time: Instant,
    ) -> Result<(Self, Vec<Action>)> {
        let mut peer = Self::new(
            remote_address,
            config,
            pool,
            PeerState::Handshaking,
            time_based_connection_id(),
            time,
        );
        debug!("connecting to {} with id {}", remote_address, peer.connection_id);
        peer.send_connect_request(time)?;
        let actions = peer.drain_actions();
        Ok((peer, actions))
    }

    /// Accepts an admitted connect request; the peer starts out connected.
    pub fn accept(
        remote_address: SocketAddr,
        config: &Config,
        pool: Arc<PacketPool>,
        request: &ConnectRequest,
        time: Instant,
    ) -> (Self, Vec<Action>) {
        let mut peer = Self::new(
            remote_address,
            config,
            pool,
            PeerState::Connected,
            request.connection_id,
            time,
        );
        debug!("accepted connection from {} with id {}", remote_address, peer.connection_id);
        peer.send_connect_accept();
        peer.events.push(PeerEvent::Connected);
        let actions = peer.drain_actions();
        (peer, actions)
    }

    /// Returns the remote endpoint.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Returns the current connection state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Returns the connection id shared by both sides.
    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    /// Returns the current path MTU.
    pub fn mtu(&self) -> usize {
        self.pmtu.mtu()
    }

    /// Returns the smoothed round-trip time in milliseconds.
    pub fn avg_rtt(&self) -> f64 {
        self.round_trip.avg_rtt()
    }

    /// Returns the index of the current flow mode.
    pub fn flow_mode(&self) -> usize {
        self.flow.current_mode()
    }

    /// Returns the traffic counters of this connection.
    pub fn statistics(&self) -> PeerStatistics {
        let mut statistics = self.statistics;
        statistics.packets_lost = self.reliable_unordered.resends() + self.reliable_ordered.resends();
        statistics
    }

    /// Returns the time since the last datagram from the remote.
    pub fn time_since_last_packet(&self, time: Instant) -> Duration {
        time.saturating_duration_since(self.last_heard)
    }

    /// Number of application packets waiting to enter their channels' windows.
    pub fn queued_packets(&self) -> usize {
        self.unreliable.queued()
            + self.sequenced.queued()
            + self.reliable_unordered.queued()
            + self.reliable_ordered.queued()
    }

    fn channel_mut(&mut self, method: DeliveryMethod) -> &mut dyn Channel {
        match method {
            DeliveryMethod::Unreliable => &mut self.unreliable,
            DeliveryMethod::Sequenced => &mut self.sequenced,
            DeliveryMethod::ReliableUnordered => &mut self.reliable_unordered,
            DeliveryMethod::ReliableOrdered => &mut self.reliable_ordered,
        }
    }

    /// Queues an application payload on the channel of `method`.
    ///
    /// Reliable payloads larger than the MTU are fragmented; unreliable and sequenced ones are
    /// rejected.
    pub fn send(&mut self, payload: &[u8], method: DeliveryMethod) -> Result<()> {
        let kind = method.packet_kind();
        let mtu = self.pmtu.mtu();
        let size = kind.header_size(false) + payload.len();

        if size <= mtu {
            let packet = self.pool.acquire_with_payload(kind, payload);
            self.channel_mut(method).enqueue_outgoing(packet);
            return Ok(());
        }
        if !method.is_reliable() {
            return Err(ErrorKind::PacketTooLarge { size, max: mtu });
        }

        let fragment_id = self.next_fragment_id;
        let fragments = fragmenter::split_payload(&self.pool, kind, payload, mtu, fragment_id)?;
        self.next_fragment_id = self.next_fragment_id.wrapping_add(1);
        let channel = self.channel_mut(method);
        for fragment in fragments {
            channel.enqueue_outgoing(fragment);
        }
        Ok(())
    }

    /// Ends the connection from the local side.
    ///
    /// A best-effort disconnect packet carrying `data` goes out; data that does not fit into one
    /// datagram is left out.
    pub fn disconnect(&mut self, data: &[u8]) -> Vec<Action> {
        if self.state.is_disconnected() {
            return Vec::new();
        }
        let room = self.pmtu.mtu() - PacketKind::Disconnect.header_size(false) - CONNECTION_ID_SIZE;
        let data = if data.len() > room {
            warn!("disconnect data of {} bytes does not fit, sending without it", data.len());
            &[][..]
        } else {
            data
        };
        let packet = messages::encode_disconnect(&self.pool, self.connection_id, data);
        self.outbox.send_direct(packet);
        self.close(DisconnectReason::DisconnectPeerCalled, Vec::new());
        self.drain_actions()
    }

    /// Ends the connection without notifying the remote, e.g. after a socket failure.
    pub fn force_disconnect(&mut self, reason: DisconnectReason) -> Vec<Action> {
        if !self.state.is_disconnected() {
            self.close(reason, Vec::new());
        }
        self.drain_actions()
    }

    /// Stops MTU discovery at the current MTU, e.g. when the socket refused a probe.
    pub fn finish_mtu_discovery(&mut self) {
        self.pmtu.finish();
    }

    fn close(&mut self, reason: DisconnectReason, data: Vec<u8>) {
        debug!("connection to {} closed: {:?}", self.remote_address, reason);
        self.state = PeerState::Disconnected;
        self.events.push(PeerEvent::Disconnected { reason, data });
    }

    fn send_connect_request(&mut self, time: Instant) -> Result<()> {
        self.connect_attempts += 1;
        self.last_connect_attempt = time;
        let request = ConnectRequest {
            protocol_id: self.config.protocol_id,
            connection_id: self.connection_id,
            key: self.config.connect_key.clone(),
        };
        let packet = request.encode(&self.pool)?;
        self.outbox.send_direct(packet);
        Ok(())
    }

    fn send_connect_accept(&mut self) {
        let packet = messages::encode_connect_accept(&self.pool, self.connection_id);
        self.outbox.send_direct(packet);
    }

    /// Runs periodic maintenance: handshake retries, timeouts, acks, pings, MTU probes and
    /// draining the channels within the send-rate budget.
    pub fn update(&mut self, time: Instant) -> Vec<Action> {
        let elapsed = time.saturating_duration_since(self.last_update);
        self.last_update = time;

        match self.state {
            PeerState::Disconnected => return Vec::new(),
            PeerState::Handshaking => {
                if time.saturating_duration_since(self.last_connect_attempt) >= self.config.reconnect_delay {
                    if self.connect_attempts >= self.config.max_connect_attempts {
                        self.close(DisconnectReason::ConnectionFailed, Vec::new());
                    } else if let Err(error) = self.send_connect_request(time) {
                        warn!("cannot send connect request to {}: {}", self.remote_address, error);
                        self.close(DisconnectReason::ConnectionFailed, Vec::new());
                    }
                }
                return self.drain_actions();
            }
            PeerState::Connected => {
                if self.time_since_last_packet(time) > self.config.disconnect_timeout {
                    self.close(DisconnectReason::Timeout, Vec::new());
                    return self.drain_actions();
                }
            }
        }

        self.reliable_unordered.send_acks(&self.pool, &mut self.outbox);
        self.reliable_ordered.send_acks(&self.pool, &mut self.outbox);

        if let Some(sequence) = self.round_trip.due_ping(time, self.config.ping_interval) {
            let mut ping = self.pool.acquire(PacketKind::Ping, 0);
            ping.set_sequence(sequence);
            self.outbox.send_owned(ping);
        }
        self.round_trip.maybe_reset(time, self.config.rtt_reset_interval);

        if let Some(tier) = self.pmtu.handle_pmtu(time) {
            let probe = messages::encode_mtu_check(&self.pool, tier);
            self.outbox.send_direct(probe);
        }

        self.send_queued_packets(time, elapsed);
        if self.reliable_ordered.resend_limit_reached() || self.reliable_unordered.resend_limit_reached() {
            warn!("{} stopped acknowledging reliable packets", self.remote_address);
            self.close(DisconnectReason::Timeout, Vec::new());
        }
        self.outbox.flush();
        self.fragments.cleanup_stale(&self.pool, time);
        self.drain_actions()
    }

    fn send_queued_packets(&mut self, time: Instant, elapsed: Duration) {
        let mut budget = self.flow.budget(time, elapsed);
        let resend_delay =
            Duration::from_secs_f64(self.config.resend_delay_ms(self.round_trip.avg_rtt()) / 1000.0);

        let channels: [&mut dyn Channel; 4] = [
            &mut self.reliable_ordered,
            &mut self.reliable_unordered,
            &mut self.sequenced,
            &mut self.unreliable,
        ];
        let mut sent = 0;
        for channel in channels {
            while budget > 0 && channel.try_send_one(time, resend_delay, &mut self.outbox) {
                budget -= 1;
                sent += 1;
            }
        }
        self.flow.record_sent(sent);
    }

    fn drain_actions(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for packet in self.outbox.drain() {
            self.statistics.record_sent(packet.len());
            actions.push(Action::Send(packet));
        }
        actions.extend(self.events.drain(..).map(Action::Emit));
        actions
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.unreliable.release_all(&self.pool);
        self.sequenced.release_all(&self.pool);
        self.reliable_unordered.release_all(&self.pool);
        self.reliable_ordered.release_all(&self.pool);
        self.fragments.release_all(&self.pool);
        self.outbox.release_all();
    }
}
