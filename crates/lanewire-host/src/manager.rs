//! The transport manager: live connections, admission and the application API.
//!
//! Two threads drive a manager: one calls [`TransportManager::receive`] in a loop, the other calls
//! [`TransportManager::tick`] at the update interval. Either can be replaced by manual calls to
//! [`TransportManager::process_datagram`] and [`TransportManager::tick`] with explicit instants.
//!
//! Locking: the live-connection map is locked only to look up, insert or remove entries. A
//! connection's own lock is never held while the map lock is taken.

use std::{
    collections::{HashMap, VecDeque},
    fmt::{self, Debug},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use crossbeam_channel::Receiver;
use lanewire_core::{
    config::Config,
    error::{ErrorKind, Result},
    packet::PacketKind,
    packet_pool::PacketPool,
    transport::DatagramSocket,
};
use lanewire_peer::{Action, DisconnectReason, Peer, PeerEvent, PeerStatistics};
use lanewire_protocol::{messages::ConnectRequest, DeliveryMethod};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{
    event_queue::{EventListener, EventQueue},
    event_types::NetEvent,
    simulator::{NetworkSimulator, Verdict},
    time::{Clock, SystemClock},
};

type SharedPeer = Arc<Mutex<Peer>>;

/// Owns every connection reachable through one datagram socket.
pub struct TransportManager<S: DatagramSocket> {
    socket: S,
    config: Config,
    pool: Arc<PacketPool>,
    peers: Mutex<HashMap<SocketAddr, SharedPeer>>,
    events: EventQueue,
    simulator: NetworkSimulator,
    retired: Mutex<PeerStatistics>,
    receive_buffer: Mutex<Vec<u8>>,
    clock: Arc<dyn Clock>,
}

impl<S: DatagramSocket> Debug for TransportManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager")
            .field("config", &self.config)
            .field("socket", &"<socket>")
            .field("peers", &self.peers.lock().len())
            .field("events", &self.events)
            .finish()
    }
}

impl<S: DatagramSocket> TransportManager<S> {
    /// Creates a manager on top of `socket` using the system clock.
    pub fn new(socket: S, config: Config) -> Self {
        Self::with_clock(socket, config, Arc::new(SystemClock))
    }

    /// Creates a manager with a custom clock.
    pub fn with_clock(socket: S, config: Config, clock: Arc<dyn Clock>) -> Self {
        let pool = Arc::new(PacketPool::new(config.packet_pool_capacity, config.max_pooled_packet_size));
        Self {
            events: EventQueue::new(config.unsynced_events),
            simulator: NetworkSimulator::new(&config),
            receive_buffer: Mutex::new(vec![0; config.receive_buffer_size]),
            socket,
            config,
            pool,
            peers: Mutex::new(HashMap::new()),
            retired: Mutex::new(PeerStatistics::default()),
            clock,
        }
    }

    /// Installs an event listener. With `unsynced_events` it is invoked on the producing thread,
    /// otherwise from [`TransportManager::poll_events`].
    pub fn with_listener(mut self, listener: EventListener) -> Self {
        self.events.set_listener(listener);
        self
    }

    /// Returns the configuration the manager runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the clock the threaded host reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Returns the local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Starts connecting to `addr`. Completion is reported as [`NetEvent::PeerConnected`].
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.connect_at(addr, self.clock.now())
    }

    /// Like [`TransportManager::connect`] with an explicit time.
    pub fn connect_at(&self, addr: SocketAddr, time: Instant) -> Result<()> {
        let (peer, actions) = {
            let mut peers = self.peers.lock();
            if peers.contains_key(&addr) {
                return Err(ErrorKind::AlreadyConnected(addr));
            }
            if peers.len() >= self.config.max_connections {
                return Err(ErrorKind::ConnectionLimitReached);
            }
            let (peer, actions) = Peer::connect(addr, &self.config, self.pool.clone(), time)?;
            let peer = Arc::new(Mutex::new(peer));
            peers.insert(addr, peer.clone());
            (peer, actions)
        };
        self.execute(addr, &peer, actions);
        Ok(())
    }

    /// Queues `payload` for `addr` on the channel selected by `method`.
    ///
    /// The payload goes out on the next tick.
    pub fn send(&self, addr: SocketAddr, payload: &[u8], method: DeliveryMethod) -> Result<()> {
        let peer = self.peer(addr).ok_or(ErrorKind::UnknownConnection(addr))?;
        let mut peer = peer.lock();
        peer.send(payload, method)
    }

    /// Queues `payload` for every connected peer. Returns how many peers it was queued for.
    ///
    /// A peer that rejects the payload (e.g. an unreliable payload above its MTU) does not stop
    /// the others from getting it; the first rejection is returned once every peer was tried.
    pub fn send_to_all(&self, payload: &[u8], method: DeliveryMethod) -> Result<usize> {
        let mut count = 0;
        let mut first_error = None;
        for (addr, peer) in self.snapshot() {
            let mut peer = peer.lock();
            if !peer.state().is_established() {
                continue;
            }
            match peer.send(payload, method) {
                Ok(()) => count += 1,
                Err(error) => {
                    debug!("broadcast payload rejected for {}: {}", addr, error);
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    /// Disconnects `addr`, sending `data` along with a best-effort disconnect packet.
    pub fn disconnect(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        let peer = self.peers.lock().remove(&addr).ok_or(ErrorKind::UnknownConnection(addr))?;
        let actions = peer.lock().disconnect(data);
        self.execute(addr, &peer, actions);
        Ok(())
    }

    /// Disconnects every connection and empties the live set.
    pub fn stop(&self) {
        let peers: Vec<(SocketAddr, SharedPeer)> = self.peers.lock().drain().collect();
        for (addr, peer) in peers {
            let actions = peer.lock().disconnect(&[]);
            self.execute(addr, &peer, actions);
        }
    }

    /// Takes the next queued event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.events.recv()
    }

    /// Dispatches queued events to the installed listener.
    pub fn poll_events(&self) -> usize {
        self.events.poll_events()
    }

    /// Returns a receiver of queued events for use on another thread.
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.events.receiver()
    }

    /// Number of live connections, handshaking ones included.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Addresses of connections that completed their handshake.
    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.snapshot()
            .into_iter()
            .filter(|(_, peer)| peer.lock().state().is_established())
            .map(|(addr, _)| addr)
            .collect()
    }

    /// Counters of one live connection.
    pub fn peer_statistics(&self, addr: SocketAddr) -> Option<PeerStatistics> {
        self.peer(addr).map(|peer| peer.lock().statistics())
    }

    /// Counters summed over live and closed connections.
    pub fn statistics(&self) -> PeerStatistics {
        let mut total = *self.retired.lock();
        for (_, peer) in self.snapshot() {
            total.accumulate(&peer.lock().statistics());
        }
        total
    }

    /// Blocks on the socket for one datagram and processes it.
    pub fn receive(&self) {
        let mut buffer = self.receive_buffer.lock();
        match self.socket.receive_datagram(&mut buffer[..]) {
            Ok((payload, from)) => {
                let time = self.clock.now();
                self.process_datagram(payload, from, time);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                error!("Error occured receiving a packet: {}", e);
                self.events.push(NetEvent::NetworkError { addr: None, error: e.kind() });
            }
        }
    }

    /// Processes one inbound datagram received at `time`.
    pub fn process_datagram(&self, bytes: &[u8], from: SocketAddr, time: Instant) {
        if self.simulator.is_active() {
            match self.simulator.intercept(bytes, from, time) {
                Verdict::Deliver => {}
                Verdict::Drop | Verdict::Delayed => return,
            }
        }
        self.handle_datagram(bytes, from, time);
    }

    /// Runs maintenance for every connection and releases due simulated datagrams.
    pub fn tick(&self, time: Instant) {
        for (bytes, from) in self.simulator.take_due(time) {
            self.handle_datagram(&bytes, from, time);
        }
        for (addr, peer) in self.snapshot() {
            let actions = peer.lock().update(time);
            self.execute(addr, &peer, actions);
        }
    }

    fn peer(&self, addr: SocketAddr) -> Option<SharedPeer> {
        self.peers.lock().get(&addr).cloned()
    }

    fn snapshot(&self) -> Vec<(SocketAddr, SharedPeer)> {
        self.peers.lock().iter().map(|(addr, peer)| (*addr, peer.clone())).collect()
    }

    fn handle_datagram(&self, bytes: &[u8], from: SocketAddr, time: Instant) {
        let packet = match self.pool.acquire_from_wire(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("discarding datagram from {}: {}", from, e);
                return;
            }
        };

        if let Some(peer) = self.peer(from) {
            let actions = peer.lock().process_packet(packet, time);
            self.execute(from, &peer, actions);
            return;
        }

        if packet.kind() != PacketKind::ConnectRequest {
            trace!("ignoring {:?} from unknown endpoint {}", packet.kind(), from);
            self.pool.release(packet);
            return;
        }
        let request = ConnectRequest::decode(&packet);
        self.pool.release(packet);
        match request {
            Ok(request) => self.admit(from, &request, time),
            Err(e) => debug!("malformed connect request from {}: {}", from, e),
        }
    }

    fn admit(&self, from: SocketAddr, request: &ConnectRequest, time: Instant) {
        if request.protocol_id != self.config.protocol_id {
            debug!("refusing {}: protocol id {} is not {}", from, request.protocol_id, self.config.protocol_id);
            return;
        }
        if request.key != self.config.connect_key {
            debug!("refusing {}: connect key does not match", from);
            return;
        }
        let (peer, actions) = {
            let mut peers = self.peers.lock();
            if peers.contains_key(&from) {
                trace!("connect request from {} raced with another admission", from);
                return;
            }
            if peers.len() >= self.config.max_connections {
                debug!("refusing {}: {} connections already live", from, peers.len());
                return;
            }
            let (peer, actions) = Peer::accept(from, &self.config, self.pool.clone(), request, time);
            let peer = Arc::new(Mutex::new(peer));
            peers.insert(from, peer.clone());
            (peer, actions)
        };
        self.execute(from, &peer, actions);
    }

    /// Performs the actions a connection asked for. Must be called without holding its lock.
    fn execute(&self, addr: SocketAddr, peer: &SharedPeer, actions: Vec<Action>) {
        let mut pending: VecDeque<Action> = actions.into();
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send(packet) => {
                    let kind = packet.kind();
                    let result = self.socket.send_datagram(&addr, packet.as_bytes());
                    self.pool.release(packet);
                    let Err(e) = result else { continue };
                    if kind == PacketKind::MtuCheck {
                        debug!("MTU probe to {} refused ({}), keeping the current MTU", addr, e);
                        peer.lock().finish_mtu_discovery();
                    } else {
                        error!("Error occured sending a packet (to {}): {}", addr, e);
                        self.events.push(NetEvent::NetworkError { addr: Some(addr), error: e.kind() });
                        let followup = peer.lock().force_disconnect(DisconnectReason::SocketSendError);
                        pending.extend(followup);
                    }
                }
                Action::Emit(event) => self.emit(addr, peer, event),
            }
        }
    }

    fn emit(&self, addr: SocketAddr, peer: &SharedPeer, event: PeerEvent) {
        let event = match event {
            PeerEvent::Connected => NetEvent::PeerConnected(addr),
            PeerEvent::Received { method, payload } => NetEvent::DataReceived { addr, method, payload },
            PeerEvent::LatencyUpdated(latency_ms) => NetEvent::LatencyUpdated { addr, latency_ms },
            PeerEvent::Disconnected { reason, data } => {
                self.retire(addr, peer);
                NetEvent::PeerDisconnected { addr, reason, data }
            }
        };
        self.events.push(event);
    }

    fn retire(&self, addr: SocketAddr, peer: &SharedPeer) {
        {
            let mut peers = self.peers.lock();
            if peers.get(&addr).map_or(false, |live| Arc::ptr_eq(live, peer)) {
                peers.remove(&addr);
            }
        }
        let statistics = peer.lock().statistics();
        self.retired.lock().accumulate(&statistics);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use lanewire_core::constants::POSSIBLE_MTU;

    use super::*;

    #[derive(Debug)]
    struct MemorySocket {
        addr: SocketAddr,
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
        fail_sends: AtomicBool,
    }

    impl MemorySocket {
        fn new(addr: &str) -> Self {
            Self { addr: addr.parse().unwrap(), sent: Mutex::new(Vec::new()), fail_sends: AtomicBool::new(false) }
        }

        fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl DatagramSocket for MemorySocket {
        fn send_datagram(&self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.lock().push((*addr, payload.to_vec()));
            Ok(payload.len())
        }

        fn receive_datagram<'a>(&self, _buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"))
        }

        fn broadcast_datagram(&self, payload: &[u8], _port: u16) -> io::Result<usize> {
            Ok(payload.len())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.addr)
        }
    }

    fn manager(addr: &str, config: Config) -> TransportManager<MemorySocket> {
        TransportManager::new(MemorySocket::new(addr), config)
    }

    fn shuttle(from: &TransportManager<MemorySocket>, to: &TransportManager<MemorySocket>, time: Instant) {
        let source = from.local_addr().unwrap();
        for (_, bytes) in from.socket().take_sent() {
            to.process_datagram(&bytes, source, time);
        }
    }

    /// Delivers each datagram `from` sent to the manager it is addressed to; datagrams for
    /// anyone else are lost.
    fn route(from: &TransportManager<MemorySocket>, to: &[&TransportManager<MemorySocket>], time: Instant) {
        let source = from.local_addr().unwrap();
        for (dest, bytes) in from.socket().take_sent() {
            if let Some(target) = to.iter().find(|manager| manager.local_addr().unwrap() == dest) {
                target.process_datagram(&bytes, source, time);
            }
        }
    }

    fn events(manager: &TransportManager<MemorySocket>) -> Vec<NetEvent> {
        std::iter::from_fn(|| manager.recv()).collect()
    }

    #[test]
    fn test_handshake_between_managers() {
        let time = Instant::now();
        let client = manager("10.0.0.1:1000", Config::default());
        let server = manager("10.0.0.2:2000", Config::default());
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        client.connect_at(server_addr, time).unwrap();
        assert_eq!(client.peer_count(), 1);
        assert!(client.connected_peers().is_empty());

        shuttle(&client, &server, time);
        assert_eq!(events(&server), vec![NetEvent::PeerConnected(client_addr)]);
        shuttle(&server, &client, time);
        assert_eq!(events(&client), vec![NetEvent::PeerConnected(server_addr)]);
        assert_eq!(client.connected_peers(), vec![server_addr]);
    }

    #[test]
    fn test_wrong_key_is_refused() {
        let time = Instant::now();
        let mut config = Config::default();
        config.connect_key = "secret".into();
        let client = manager("10.0.0.1:1000", Config::default());
        let server = manager("10.0.0.2:2000", config);

        client.connect_at(server.local_addr().unwrap(), time).unwrap();
        shuttle(&client, &server, time);
        assert_eq!(server.peer_count(), 0);
        assert!(server.socket().take_sent().is_empty());
        assert!(events(&server).is_empty());
    }

    #[test]
    fn test_connection_cap_and_duplicates() {
        let time = Instant::now();
        let client = manager("10.0.0.1:1000", Config::default());
        let first: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        let second: SocketAddr = "10.0.0.3:3000".parse().unwrap();

        client.connect_at(first, time).unwrap();
        assert!(matches!(client.connect_at(first, time), Err(ErrorKind::AlreadyConnected(addr)) if addr == first));
        assert!(matches!(client.connect_at(second, time), Err(ErrorKind::ConnectionLimitReached)));
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let client = manager("10.0.0.1:1000", Config::default());
        let unknown: SocketAddr = "10.0.0.9:9000".parse().unwrap();
        assert!(matches!(
            client.send(unknown, b"x", DeliveryMethod::Unreliable),
            Err(ErrorKind::UnknownConnection(addr)) if addr == unknown
        ));
        assert!(matches!(client.disconnect(unknown, &[]), Err(ErrorKind::UnknownConnection(_))));
    }

    #[test]
    fn test_send_failure_disconnects_peer() {
        let time = Instant::now();
        let client = manager("10.0.0.1:1000", Config::default());
        client.socket().fail_sends.store(true, Ordering::SeqCst);
        let server: SocketAddr = "10.0.0.2:2000".parse().unwrap();

        client.connect_at(server, time).unwrap();
        assert_eq!(
            events(&client),
            vec![
                NetEvent::NetworkError { addr: Some(server), error: io::ErrorKind::ConnectionRefused },
                NetEvent::PeerDisconnected {
                    addr: server,
                    reason: DisconnectReason::SocketSendError,
                    data: Vec::new(),
                },
            ]
        );
        assert_eq!(client.peer_count(), 0);
    }

    #[test]
    fn test_local_disconnect_removes_peer() {
        let time = Instant::now();
        let client = manager("10.0.0.1:1000", Config::default());
        let server = manager("10.0.0.2:2000", Config::default());
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();
        client.connect_at(server_addr, time).unwrap();
        shuttle(&client, &server, time);
        shuttle(&server, &client, time);
        events(&server);

        server.disconnect(client_addr, b"later").unwrap();
        assert_eq!(server.peer_count(), 0);
        assert_eq!(
            events(&server),
            vec![NetEvent::PeerDisconnected {
                addr: client_addr,
                reason: DisconnectReason::DisconnectPeerCalled,
                data: Vec::new(),
            }]
        );
        assert!(server.statistics().packets_sent >= 2);

        events(&client);
        shuttle(&server, &client, time);
        assert_eq!(
            events(&client),
            vec![NetEvent::PeerDisconnected {
                addr: server_addr,
                reason: DisconnectReason::RemoteConnectionClose,
                data: b"later".to_vec(),
            }]
        );
        assert_eq!(client.peer_count(), 0);
    }

    #[test]
    fn test_send_to_all_counts_connected_peers() {
        let time = Instant::now();
        let client = manager("10.0.0.1:1000", Config::default());
        assert_eq!(client.send_to_all(b"x", DeliveryMethod::Unreliable).unwrap(), 0);

        let server = manager("10.0.0.2:2000", Config::default());
        client.connect_at(server.local_addr().unwrap(), time).unwrap();
        assert_eq!(client.send_to_all(b"x", DeliveryMethod::Unreliable).unwrap(), 0);
        shuttle(&client, &server, time);
        shuttle(&server, &client, time);
        assert_eq!(client.send_to_all(b"x", DeliveryMethod::Unreliable).unwrap(), 1);
    }

    #[test]
    fn test_send_to_all_reaches_every_peer_before_reporting_rejection() {
        let start = Instant::now();
        let mut config = Config::default();
        config.max_connections = 2;
        let client = manager("10.0.0.1:1000", config);
        let wide = manager("10.0.0.2:2000", Config::default());
        let narrow = manager("10.0.0.3:3000", Config::default());
        client.connect_at(wide.local_addr().unwrap(), start).unwrap();
        client.connect_at(narrow.local_addr().unwrap(), start).unwrap();
        route(&client, &[&wide, &narrow], start);
        shuttle(&wide, &client, start);
        shuttle(&narrow, &client, start);
        assert_eq!(client.connected_peers().len(), 2);

        // Only the path to `wide` answers the first MTU check.
        let time = start + Duration::from_secs(1);
        client.tick(time);
        route(&client, &[&wide], time);
        shuttle(&wide, &client, time);
        events(&wide);
        events(&narrow);

        let payload = vec![7u8; 1000];
        let result = client.send_to_all(&payload, DeliveryMethod::Unreliable);
        assert!(matches!(result, Err(ErrorKind::PacketTooLarge { max, .. }) if max == POSSIBLE_MTU[0]));

        let time = time + Duration::from_millis(15);
        client.tick(time);
        route(&client, &[&wide, &narrow], time);
        let client_addr = client.local_addr().unwrap();
        assert!(events(&wide).contains(&NetEvent::DataReceived {
            addr: client_addr,
            method: DeliveryMethod::Unreliable,
            payload,
        }));
        assert!(!events(&narrow).iter().any(|event| matches!(event, NetEvent::DataReceived { .. })));
    }

    #[test]
    fn test_connect_with_oversized_key_leaves_no_peer() {
        let mut config = Config::default();
        config.connect_key = "k".repeat(POSSIBLE_MTU[0]);
        let client = manager("10.0.0.1:1000", config);
        let server: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        assert!(matches!(client.connect_at(server, Instant::now()), Err(ErrorKind::PacketTooLarge { .. })));
        assert_eq!(client.peer_count(), 0);
        assert!(client.socket().take_sent().is_empty());
    }

    #[test]
    fn test_garbage_from_unknown_endpoint_is_ignored() {
        let server = manager("10.0.0.2:2000", Config::default());
        let stranger: SocketAddr = "10.0.0.7:7000".parse().unwrap();
        server.process_datagram(&[0xFF, 1, 2], stranger, Instant::now());
        server.process_datagram(&[PacketKind::Unreliable as u8, 1, 2], stranger, Instant::now());
        assert_eq!(server.peer_count(), 0);
        assert!(server.socket().take_sent().is_empty());
    }
}
