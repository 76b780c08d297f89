//! Codecs for the control packets exchanged by the connection state machine.
//!
//! All multi-byte fields are little-endian.
//!
//! | kind            | payload                                              |
//! |-----------------|------------------------------------------------------|
//! | connect request | protocol id (4), connection id (8), key len (2), key |
//! | connect accept  | connection id (8)                                    |
//! | disconnect      | connection id (8), application data                  |
//! | mtu check / ok  | tier index (1), zero padding up to the tier size     |

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use lanewire_core::{
    constants::{CONNECTION_ID_SIZE, POSSIBLE_MTU},
    error::{DecodingErrorKind, ErrorKind, Result},
    packet::{Packet, PacketKind},
    packet_pool::PacketPool,
};

fn control_error<E>(_: E) -> ErrorKind {
    ErrorKind::DecodingError(DecodingErrorKind::ControlPayload)
}

fn expect_kind(packet: &Packet, kind: PacketKind) -> Result<()> {
    if packet.kind() == kind {
        Ok(())
    } else {
        Err(ErrorKind::DecodingError(DecodingErrorKind::PacketKind))
    }
}

/// Connection request sent by the initiating side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Protocol identifier; must match the receiver's.
    pub protocol_id: u32,
    /// Time-based nonce identifying this connection attempt.
    pub connection_id: i64,
    /// Shared application key.
    pub key: String,
}

impl ConnectRequest {
    /// Encodes the request into a pooled packet.
    ///
    /// The request has to fit into the smallest MTU, which also keeps the key length within its
    /// 16-bit field.
    pub fn encode(&self, pool: &PacketPool) -> Result<Packet> {
        let key = self.key.as_bytes();
        let payload_size = 4 + CONNECTION_ID_SIZE + 2 + key.len();
        let size = PacketKind::ConnectRequest.header_size(false) + payload_size;
        if size > POSSIBLE_MTU[0] {
            return Err(ErrorKind::PacketTooLarge { size, max: POSSIBLE_MTU[0] });
        }
        let mut packet = pool.acquire(PacketKind::ConnectRequest, payload_size);
        let payload = packet.payload_mut();
        LittleEndian::write_u32(&mut payload[0..4], self.protocol_id);
        LittleEndian::write_i64(&mut payload[4..12], self.connection_id);
        LittleEndian::write_u16(&mut payload[12..14], key.len() as u16);
        payload[14..].copy_from_slice(key);
        Ok(packet)
    }

    /// Decodes a request from a received packet.
    pub fn decode(packet: &Packet) -> Result<Self> {
        expect_kind(packet, PacketKind::ConnectRequest)?;
        let mut cursor = Cursor::new(packet.payload());
        let protocol_id = cursor.read_u32::<LittleEndian>().map_err(control_error)?;
        let connection_id = cursor.read_i64::<LittleEndian>().map_err(control_error)?;
        let key_len = cursor.read_u16::<LittleEndian>().map_err(control_error)? as usize;
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key).map_err(control_error)?;
        let key = String::from_utf8(key).map_err(control_error)?;
        Ok(Self { protocol_id, connection_id, key })
    }
}

/// Encodes a connect accept carrying `connection_id`.
pub fn encode_connect_accept(pool: &PacketPool, connection_id: i64) -> Packet {
    let mut packet = pool.acquire(PacketKind::ConnectAccept, CONNECTION_ID_SIZE);
    LittleEndian::write_i64(packet.payload_mut(), connection_id);
    packet
}

/// Decodes the connection id of a connect accept.
pub fn decode_connect_accept(packet: &Packet) -> Result<i64> {
    expect_kind(packet, PacketKind::ConnectAccept)?;
    Cursor::new(packet.payload()).read_i64::<LittleEndian>().map_err(control_error)
}

/// Encodes a disconnect carrying `connection_id` and optional application data.
pub fn encode_disconnect(pool: &PacketPool, connection_id: i64, data: &[u8]) -> Packet {
    let mut packet = pool.acquire(PacketKind::Disconnect, CONNECTION_ID_SIZE + data.len());
    let payload = packet.payload_mut();
    LittleEndian::write_i64(&mut payload[..CONNECTION_ID_SIZE], connection_id);
    payload[CONNECTION_ID_SIZE..].copy_from_slice(data);
    packet
}

/// Decodes a disconnect into its connection id and application data.
pub fn decode_disconnect(packet: &Packet) -> Result<(i64, &[u8])> {
    expect_kind(packet, PacketKind::Disconnect)?;
    let payload = packet.payload();
    if payload.len() < CONNECTION_ID_SIZE {
        return Err(control_error(()));
    }
    let connection_id = LittleEndian::read_i64(&payload[..CONNECTION_ID_SIZE]);
    Ok((connection_id, &payload[CONNECTION_ID_SIZE..]))
}

/// Encodes an MTU probe for `tier`, padded to exactly that tier's datagram size.
pub fn encode_mtu_check(pool: &PacketPool, tier: usize) -> Packet {
    let header = PacketKind::MtuCheck.header_size(false);
    let mut packet = pool.acquire(PacketKind::MtuCheck, POSSIBLE_MTU[tier] - header);
    packet.payload_mut()[0] = tier as u8;
    packet
}

/// Validates an MTU probe or confirmation and returns its tier index.
///
/// A probe whose datagram size does not match its tier was truncated on the way and is rejected.
pub fn decode_mtu_tier(packet: &Packet) -> Result<usize> {
    if !matches!(packet.kind(), PacketKind::MtuCheck | PacketKind::MtuOk) {
        return Err(ErrorKind::DecodingError(DecodingErrorKind::PacketKind));
    }
    let tier = *packet.payload().first().ok_or(DecodingErrorKind::ControlPayload)? as usize;
    match POSSIBLE_MTU.get(tier) {
        Some(&size) if size == packet.len() => Ok(tier),
        _ => Err(ErrorKind::DecodingError(DecodingErrorKind::ControlPayload)),
    }
}
