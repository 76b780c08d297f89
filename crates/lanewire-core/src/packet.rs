//! Packet kinds, header layout and the owned packet handle.
//!
//! Every datagram starts with one tag byte: bit 7 is the fragmented flag and bits 0-6 carry the
//! [`PacketKind`]. Sequence-bearing kinds follow the tag with a little-endian `u16` sequence number,
//! and fragmented packets append a fragment header (id, index, count; `u16` each):
//!
//! ```text
//! +-----+----------+-------------+----------------+----------------+---------+
//! | tag | sequence | fragment id | fragment index | fragment count | payload |
//! |  1  |    2     |      2      |       2        |       2        |   ...   |
//! +-----+----------+-------------+----------------+----------------+---------+
//! ```
//!
//! A [`Packet`] owns its buffer. It is deliberately not `Clone`: whoever holds the handle owns the
//! bytes, and giving it back to the pool consumes it.

use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    constants::{FRAGMENTED_HEADER_SIZE, HEADER_SIZE, SEQUENCED_HEADER_SIZE},
    error::{DecodingErrorKind, ErrorKind},
};

/// 16-bit sequence number type used by protocol.
pub type SequenceNumber = u16;

const FRAGMENTED_FLAG: u8 = 0x80;
const KIND_MASK: u8 = 0x7F;

/// Closed enumeration of packet kinds carried in the tag byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Application data without any guarantee.
    Unreliable = 0,
    /// Application data, reliable and unordered.
    Reliable = 1,
    /// Application data, only the latest is delivered.
    Sequenced = 2,
    /// Application data, reliable and ordered.
    ReliableOrdered = 3,
    /// Acknowledgment window of the reliable unordered channel.
    AckReliable = 4,
    /// Acknowledgment window of the reliable ordered channel.
    AckReliableOrdered = 5,
    /// RTT probe.
    Ping = 6,
    /// Reply to a ping.
    Pong = 7,
    /// Connection request.
    ConnectRequest = 8,
    /// Connection accepted.
    ConnectAccept = 9,
    /// Connection closed.
    Disconnect = 10,
    /// Connectionless message, handled outside the transport core.
    UnconnectedMessage = 11,
    /// NAT introduction request, handled outside the transport core.
    NatIntroductionRequest = 12,
    /// NAT introduction, handled outside the transport core.
    NatIntroduction = 13,
    /// NAT punch message, handled outside the transport core.
    NatPunchMessage = 14,
    /// MTU probe.
    MtuCheck = 15,
    /// MTU probe confirmation.
    MtuOk = 16,
    /// LAN discovery request, handled outside the transport core.
    DiscoveryRequest = 17,
    /// LAN discovery response, handled outside the transport core.
    DiscoveryResponse = 18,
    /// Several packets carried in one datagram.
    Merged = 19,
}

impl TryFrom<u8> for PacketKind {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PacketKind::*;
        let kind = match value {
            0 => Unreliable,
            1 => Reliable,
            2 => Sequenced,
            3 => ReliableOrdered,
            4 => AckReliable,
            5 => AckReliableOrdered,
            6 => Ping,
            7 => Pong,
            8 => ConnectRequest,
            9 => ConnectAccept,
            10 => Disconnect,
            11 => UnconnectedMessage,
            12 => NatIntroductionRequest,
            13 => NatIntroduction,
            14 => NatPunchMessage,
            15 => MtuCheck,
            16 => MtuOk,
            17 => DiscoveryRequest,
            18 => DiscoveryResponse,
            19 => Merged,
            _ => return Err(ErrorKind::DecodingError(DecodingErrorKind::PacketKind)),
        };
        Ok(kind)
    }
}

impl PacketKind {
    /// Returns true if packets of this kind carry a sequence number.
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            PacketKind::Reliable
                | PacketKind::Sequenced
                | PacketKind::ReliableOrdered
                | PacketKind::AckReliable
                | PacketKind::AckReliableOrdered
                | PacketKind::Ping
                | PacketKind::Pong
        )
    }

    /// Returns true if packets of this kind may carry the fragmented flag.
    pub fn can_fragment(self) -> bool {
        matches!(self, PacketKind::Reliable | PacketKind::ReliableOrdered)
    }

    /// Returns true if packets of this kind may share a merged datagram.
    pub fn is_mergeable(self) -> bool {
        matches!(
            self,
            PacketKind::Unreliable
                | PacketKind::Reliable
                | PacketKind::Sequenced
                | PacketKind::ReliableOrdered
                | PacketKind::AckReliable
                | PacketKind::AckReliableOrdered
                | PacketKind::Ping
        )
    }

    /// Returns the header size for this kind.
    pub fn header_size(self, fragmented: bool) -> usize {
        if fragmented {
            FRAGMENTED_HEADER_SIZE
        } else if self.is_sequenced() {
            SEQUENCED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }
}

/// An owned packet buffer tagged with its kind.
///
/// The buffer always holds at least the header of its kind; `payload` is everything behind it.
pub struct Packet {
    kind: PacketKind,
    data: Vec<u8>,
}

impl Packet {
    /// Wraps an already validated buffer.
    pub(crate) fn from_buffer(kind: PacketKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Returns the buffer so it can be pooled.
    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.data
    }

    /// Returns the kind of this packet.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Changes the kind, keeping the fragmented flag and header layout.
    ///
    /// Only valid between kinds with the same header size.
    pub fn set_kind(&mut self, kind: PacketKind) {
        debug_assert_eq!(kind.header_size(false), self.kind.header_size(false));
        self.kind = kind;
        self.data[0] = (self.data[0] & FRAGMENTED_FLAG) | kind as u8;
    }

    /// Returns true if this packet carries a fragment header.
    pub fn is_fragmented(&self) -> bool {
        self.data[0] & FRAGMENTED_FLAG != 0
    }

    /// Returns the size of this packet's header.
    pub fn header_size(&self) -> usize {
        self.kind.header_size(self.is_fragmented())
    }

    /// Returns the sequence number, or 0 for kinds without one.
    pub fn sequence(&self) -> SequenceNumber {
        if self.kind.is_sequenced() {
            LittleEndian::read_u16(&self.data[1..3])
        } else {
            0
        }
    }

    /// Stores the sequence number. No-op for kinds without one.
    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        if self.kind.is_sequenced() {
            LittleEndian::write_u16(&mut self.data[1..3], sequence);
        }
    }

    /// Returns the fragment id of a fragmented packet.
    pub fn fragment_id(&self) -> u16 {
        LittleEndian::read_u16(&self.data[3..5])
    }

    /// Returns the index of this fragment inside its message.
    pub fn fragment_part(&self) -> u16 {
        LittleEndian::read_u16(&self.data[5..7])
    }

    /// Returns the number of fragments of the message.
    pub fn fragment_total(&self) -> u16 {
        LittleEndian::read_u16(&self.data[7..9])
    }

    /// Writes the fragment header of a fragmented packet.
    pub fn set_fragment_info(&mut self, id: u16, part: u16, total: u16) {
        debug_assert!(self.is_fragmented());
        LittleEndian::write_u16(&mut self.data[3..5], id);
        LittleEndian::write_u16(&mut self.data[5..7], part);
        LittleEndian::write_u16(&mut self.data[7..9], total);
    }

    /// Returns the bytes after the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_size()..]
    }

    /// Returns the mutable bytes after the header.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header = self.header_size();
        &mut self.data[header..]
    }

    /// Returns the full datagram bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the full datagram length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the packet has no payload.
    pub fn is_empty(&self) -> bool {
        self.data.len() == self.header_size()
    }

    /// Shortens the payload so the datagram is `len` bytes long. Never cuts into the header.
    pub fn truncate(&mut self, len: usize) {
        let len = len.max(self.header_size());
        self.data.truncate(len);
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("fragmented", &self.is_fragmented())
            .field("sequence", &self.sequence())
            .field("len", &self.data.len())
            .finish()
    }
}

/// Composes the tag byte for a kind.
pub(crate) fn tag_byte(kind: PacketKind, fragmented: bool) -> u8 {
    if fragmented {
        kind as u8 | FRAGMENTED_FLAG
    } else {
        kind as u8
    }
}

/// Splits a tag byte into its kind bits and fragmented flag.
pub(crate) fn split_tag(tag: u8) -> (u8, bool) {
    (tag & KIND_MASK, tag & FRAGMENTED_FLAG != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_through_tag() {
        for value in 0..20u8 {
            let kind = PacketKind::try_from(value).unwrap();
            assert_eq!(kind as u8, value);
        }
        assert!(PacketKind::try_from(20).is_err());
        assert!(PacketKind::try_from(0x7F).is_err());
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(PacketKind::Unreliable.header_size(false), 1);
        assert_eq!(PacketKind::ConnectRequest.header_size(false), 1);
        assert_eq!(PacketKind::Sequenced.header_size(false), 3);
        assert_eq!(PacketKind::Ping.header_size(false), 3);
        assert_eq!(PacketKind::ReliableOrdered.header_size(true), 9);
    }

    #[test]
    fn test_only_reliable_kinds_fragment() {
        assert!(PacketKind::Reliable.can_fragment());
        assert!(PacketKind::ReliableOrdered.can_fragment());
        assert!(!PacketKind::Unreliable.can_fragment());
        assert!(!PacketKind::Sequenced.can_fragment());
        assert!(!PacketKind::AckReliable.can_fragment());
    }

    #[test]
    fn test_sequence_is_little_endian() {
        let mut packet = Packet::from_buffer(PacketKind::Sequenced, vec![2, 0, 0, 9]);
        packet.set_sequence(0x1234);
        assert_eq!(packet.as_bytes(), &[2, 0x34, 0x12, 9]);
        assert_eq!(packet.sequence(), 0x1234);
        assert_eq!(packet.payload(), &[9]);
    }

    #[test]
    fn test_fragment_header_layout() {
        let mut data = vec![0u8; 12];
        data[0] = tag_byte(PacketKind::Reliable, true);
        let mut packet = Packet::from_buffer(PacketKind::Reliable, data);
        packet.set_sequence(7);
        packet.set_fragment_info(1, 2, 3);
        assert!(packet.is_fragmented());
        assert_eq!(&packet.as_bytes()[..9], &[0x81, 7, 0, 1, 0, 2, 0, 3, 0]);
        assert_eq!(packet.payload().len(), 3);
        assert_eq!((packet.fragment_id(), packet.fragment_part(), packet.fragment_total()), (1, 2, 3));
    }

    #[test]
    fn test_set_kind_keeps_flag_and_payload() {
        let mut packet = Packet::from_buffer(PacketKind::MtuCheck, vec![15, 2, 0, 0]);
        packet.set_kind(PacketKind::MtuOk);
        assert_eq!(packet.kind(), PacketKind::MtuOk);
        assert_eq!(packet.as_bytes(), &[16, 2, 0, 0]);
    }
}
