use std::convert::TryFrom;

use lanewire_core::{
    error::{DecodingErrorKind, ErrorKind},
    packet::PacketKind,
};

/// Delivery guarantee requested for an application payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    /// Packet may be dropped, duplicated or reordered.
    Unreliable,
    /// Packets older than the newest delivered one are dropped.
    Sequenced,
    /// Packet will be delivered, in any order.
    ReliableUnordered,
    /// Packet will be delivered, in send order.
    ReliableOrdered,
}

impl DeliveryMethod {
    /// Packet kind used for data sent with this method.
    pub fn packet_kind(self) -> PacketKind {
        match self {
            DeliveryMethod::Unreliable => PacketKind::Unreliable,
            DeliveryMethod::Sequenced => PacketKind::Sequenced,
            DeliveryMethod::ReliableUnordered => PacketKind::Reliable,
            DeliveryMethod::ReliableOrdered => PacketKind::ReliableOrdered,
        }
    }

    /// Returns true if payloads sent with this method may be fragmented.
    pub fn is_reliable(self) -> bool {
        matches!(self, DeliveryMethod::ReliableUnordered | DeliveryMethod::ReliableOrdered)
    }
}

impl TryFrom<PacketKind> for DeliveryMethod {
    type Error = ErrorKind;

    fn try_from(kind: PacketKind) -> Result<Self, Self::Error> {
        match kind {
            PacketKind::Unreliable => Ok(DeliveryMethod::Unreliable),
            PacketKind::Sequenced => Ok(DeliveryMethod::Sequenced),
            PacketKind::Reliable => Ok(DeliveryMethod::ReliableUnordered),
            PacketKind::ReliableOrdered => Ok(DeliveryMethod::ReliableOrdered),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::PacketKind)),
        }
    }
}
