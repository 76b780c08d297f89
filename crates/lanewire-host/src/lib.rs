#![warn(missing_docs)]

//! lanewire-host: transport manager, events and the threaded UDP host.

/// Delivery of events to the application.
pub mod event_queue;
/// Events reported to the application.
pub mod event_types;
/// Live connection set, admission and the application API.
pub mod manager;
/// Inbound loss and latency simulation.
pub mod simulator;
/// UDP socket adapter and the threaded host.
pub mod socket;
/// Time utilities for the host.
pub mod time;

pub use event_queue::{EventListener, EventQueue};
pub use event_types::NetEvent;
pub use manager::TransportManager;
pub use socket::{Host, UdpTransport};
pub use time::{Clock, ManualClock, SystemClock};
