use std::{
    fmt, io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::Receiver;
use lanewire_core::{config::Config, error::Result, transport::DatagramSocket};
use lanewire_peer::PeerStatistics;
use lanewire_protocol::DeliveryMethod;
use socket2::Socket as Socket2;
use tracing::{debug, error};

use crate::{
    event_queue::EventListener,
    event_types::NetEvent,
    manager::TransportManager,
    time::{Clock, SystemClock},
};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }
    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }

    // The receive loop checks for shutdown between reads.
    socket.set_read_timeout(config.socket_polling_timeout)?;
    Ok(())
}

/// [`DatagramSocket`] over a standard UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Wraps `socket` after applying the socket options of `config`.
    pub fn new(socket: UdpSocket, config: &Config) -> Result<Self> {
        apply_socket_options(&socket, config)?;
        Ok(Self { socket })
    }
}

impl DatagramSocket for UdpTransport {
    fn send_datagram(&self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_datagram<'a>(&self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(recv_len, address)| (&buffer[..recv_len], address))
    }

    fn broadcast_datagram(&self, payload: &[u8], port: u16) -> io::Result<usize> {
        self.socket.send_to(payload, SocketAddrV4::new(Ipv4Addr::BROADCAST, port))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// UDP endpoint running a [`TransportManager`] on two worker threads.
///
/// Call [`Host::start`] to spawn the receive and tick threads. Without it the manager can be
/// driven by hand through [`Host::manager`].
pub struct Host {
    manager: Arc<TransportManager<UdpTransport>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("manager", &self.manager)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Host {
    /// Creates a new Host bound to the specified address with default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with the specified configuration.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let socket = UdpSocket::bind(address)?;
        Self::bind_with_config_and_clock(socket, config, Arc::new(SystemClock), None)
    }

    /// Creates a new Host bound to the specified address with custom configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::bind_with_config_and_clock(socket, config, Arc::new(SystemClock), None)
    }

    /// Creates a new Host from an existing socket, with a custom clock and an optional listener.
    pub fn bind_with_config_and_clock(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
        listener: Option<EventListener>,
    ) -> Result<Self> {
        let transport = UdpTransport::new(socket, &config)?;
        let mut manager = TransportManager::with_clock(transport, config, clock);
        if let Some(listener) = listener {
            manager = manager.with_listener(listener);
        }
        Ok(Host { manager: Arc::new(manager), running: Arc::new(AtomicBool::new(false)), threads: Vec::new() })
    }

    /// Spawns the receive and tick threads. Does nothing if they already run.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let manager = self.manager.clone();
        let running = self.running.clone();
        let receiver = thread::Builder::new().name("lanewire-receive".into()).spawn(move || {
            while running.load(Ordering::Acquire) {
                manager.receive();
            }
        })?;
        self.threads.push(receiver);

        let manager = self.manager.clone();
        let running = self.running.clone();
        let ticker = thread::Builder::new().name("lanewire-tick".into()).spawn(move || {
            let interval = manager.config().update_interval;
            while running.load(Ordering::Acquire) {
                manager.tick(manager.clock().now());
                thread::sleep(interval);
            }
        })?;
        self.threads.push(ticker);

        debug!("host on {:?} started", self.manager.local_addr().ok());
        Ok(())
    }

    /// Disconnects every peer and joins the worker threads.
    ///
    /// With `socket_polling_timeout` set to `None` the receive thread only notices the shutdown
    /// after its next datagram.
    pub fn stop(&mut self) {
        self.manager.stop();
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("a lanewire worker thread panicked");
            }
        }
    }

    /// Returns the manager behind this host.
    pub fn manager(&self) -> &Arc<TransportManager<UdpTransport>> {
        &self.manager
    }

    /// Starts connecting to `addr`.
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.manager.connect(addr)
    }

    /// Queues `payload` for `addr`.
    pub fn send(&self, addr: SocketAddr, payload: &[u8], method: DeliveryMethod) -> Result<()> {
        self.manager.send(addr, payload, method)
    }

    /// Queues `payload` for every connected peer and returns how many there were.
    pub fn send_to_all(&self, payload: &[u8], method: DeliveryMethod) -> Result<usize> {
        self.manager.send_to_all(payload, method)
    }

    /// Disconnects `addr` with optional application data.
    pub fn disconnect(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        self.manager.disconnect(addr, data)
    }

    /// Receives the next queued network event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.manager.recv()
    }

    /// Dispatches queued events to the listener given at bind time.
    pub fn poll_events(&self) -> usize {
        self.manager.poll_events()
    }

    /// Returns a clone of the event receiver channel for receiving network events.
    pub fn get_event_receiver(&self) -> Receiver<NetEvent> {
        self.manager.event_receiver()
    }

    /// Runs one maintenance pass at `time`, for hosts that were not started.
    pub fn manual_tick(&self, time: Instant) {
        self.manager.tick(time);
    }

    /// Returns the local socket address this host is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.manager.local_addr()
    }

    /// Addresses of connected peers.
    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.manager.connected_peers()
    }

    /// Counters summed over every connection this host had.
    pub fn statistics(&self) -> PeerStatistics {
        self.manager.statistics()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if self.running.load(Ordering::Acquire) {
            self.stop();
        }
    }
}
