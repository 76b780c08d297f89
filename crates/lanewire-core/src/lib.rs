#![warn(missing_docs)]

//! lanewire-core: foundational types shared by every layer.
//!
//! This crate provides the minimal set of building blocks the other crates sit on:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Packet kinds and header layout
//! - Memory utilities (packet pooling)
//! - The datagram socket abstraction
//!
//! Delivery logic lives in the specialized crates:
//! - `lanewire-protocol`: sequence arithmetic, control messages, delivery channels
//! - `lanewire-peer`: per-connection state machine
//! - `lanewire-host`: transport manager, events, sockets and threads

/// Protocol constants shared across layers.
pub mod constants {
    /// Size of the modular sequence space.
    pub const MAX_SEQUENCE: u16 = 32768;
    /// Half of the sequence space; the largest distance two in-window sequences may have.
    pub const HALF_MAX_SEQUENCE: u16 = MAX_SEQUENCE / 2;
    /// Default capacity of a reliable channel's sliding window.
    pub const DEFAULT_WINDOW_SIZE: u16 = 64;
    /// Size of the header shared by every packet (kind tag + fragmented flag).
    pub const HEADER_SIZE: usize = 1;
    /// Size of the header for sequence-bearing packets.
    pub const SEQUENCED_HEADER_SIZE: usize = 3;
    /// Size of the fragment header (fragment id, index, count).
    pub const FRAGMENT_HEADER_SIZE: usize = 6;
    /// Size of the header for fragmented packets.
    pub const FRAGMENTED_HEADER_SIZE: usize = SEQUENCED_HEADER_SIZE + FRAGMENT_HEADER_SIZE;
    /// Length prefix in front of every packet inside a merged datagram.
    pub const MERGE_LENGTH_PREFIX: usize = 2;
    /// Size of a connection id on the wire.
    pub const CONNECTION_ID_SIZE: usize = 8;
    /// Identifier every connect request must carry.
    pub const PROTOCOL_ID: u32 = 1;
    /// Worst case IP + UDP header overhead subtracted from link MTUs.
    pub const MAX_UDP_HEADER_SIZE: usize = 68;
    /// Datagram sizes probed by MTU discovery, smallest first.
    ///
    /// Each entry is a common link MTU minus `MAX_UDP_HEADER_SIZE`.
    pub const POSSIBLE_MTU: [usize; 6] = [
        576 - MAX_UDP_HEADER_SIZE,
        1492 - MAX_UDP_HEADER_SIZE,
        1500 - MAX_UDP_HEADER_SIZE,
        4352 - MAX_UDP_HEADER_SIZE,
        4464 - MAX_UDP_HEADER_SIZE,
        7981 - MAX_UDP_HEADER_SIZE,
    ];
    /// Largest datagram the transport will ever produce or accept.
    pub const MAX_PACKET_SIZE: usize = POSSIBLE_MTU[POSSIBLE_MTU.len() - 1];
}

/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet kinds, header layout and the owned packet handle.
pub mod packet;
/// Packet pooling for memory efficiency.
pub mod packet_pool;
/// Datagram socket abstraction for pluggable I/O.
pub mod transport;
