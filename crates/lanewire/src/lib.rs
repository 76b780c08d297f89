#![warn(missing_docs)]

//! Lanewire: reliable multi-channel UDP transport.
//!
//! This crate re-exports the surface needed to build an application:
//!
//! - Host, manager and events (`Host`, `TransportManager`, `NetEvent`)
//! - Delivery methods (`DeliveryMethod`)
//! - Configuration and errors (`Config`, `ErrorKind`)
//!
//! Example
//! ```no_run
//! use lanewire::{DeliveryMethod, Host, NetEvent};
//!
//! let mut server = Host::bind("127.0.0.1:9050").unwrap();
//! server.start().unwrap();
//!
//! let mut client = Host::bind_any().unwrap();
//! client.start().unwrap();
//! let server_addr = server.local_addr().unwrap();
//! client.connect(server_addr).unwrap();
//!
//! let events = server.get_event_receiver();
//! while let Ok(event) = events.recv() {
//!     if let NetEvent::PeerConnected(addr) = event {
//!         server.send(addr, b"welcome", DeliveryMethod::ReliableOrdered).unwrap();
//!     }
//! }
//! ```

// Core config and errors
pub use lanewire_core::{
    config::{Config, FlowMode},
    error::{ErrorKind, Result},
    transport::DatagramSocket,
};
// Host: manages connections and events
pub use lanewire_host::{Clock, EventListener, Host, ManualClock, NetEvent, SystemClock, TransportManager, UdpTransport};
// Connection outcomes and counters
pub use lanewire_peer::{DisconnectReason, PeerStatistics};
// Protocol: delivery methods
pub use lanewire_protocol::DeliveryMethod;

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{Config, DeliveryMethod, DisconnectReason, ErrorKind, Host, NetEvent};
}
