#![warn(missing_docs)]

//! lanewire-protocol: sequence arithmetic, control messages and delivery channels.

/// Delivery channels (unreliable, sequenced, reliable ordered/unordered).
pub mod channel;
/// Delivery methods selectable by the application.
pub mod delivery;
/// Merged datagram codec.
pub mod merge;
/// Control packet codecs.
pub mod messages;
/// Wraparound sequence arithmetic.
pub mod sequence;

pub use channel::{Channel, Outbound, ReliableChannel, SequencedChannel, UnreliableChannel, MAX_WINDOW_SIZE};
pub use delivery::DeliveryMethod;
