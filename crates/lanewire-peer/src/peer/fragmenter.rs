use lanewire_core::{
    constants::FRAGMENTED_HEADER_SIZE,
    error::{ErrorKind, Result},
    packet::{Packet, PacketKind},
    packet_pool::PacketPool,
};
use tracing::trace;

/// Splits `payload` into fragments of at most `mtu` bytes each, sharing `fragment_id`.
pub(crate) fn split_payload(
    pool: &PacketPool,
    kind: PacketKind,
    payload: &[u8],
    mtu: usize,
    fragment_id: u16,
) -> Result<Vec<Packet>> {
    let max_fragment_payload = mtu - FRAGMENTED_HEADER_SIZE;
    let total = (payload.len() + max_fragment_payload - 1) / max_fragment_payload;
    if total > u16::MAX as usize {
        return Err(ErrorKind::TooManyFragments(total));
    }

    trace!("Fragmenting {} byte payload into {} fragments", payload.len(), total);
    let fragments = payload
        .chunks(max_fragment_payload)
        .enumerate()
        .map(|(part, chunk)| {
            let mut packet = pool.acquire_fragment(kind, chunk.len());
            packet.set_fragment_info(fragment_id, part as u16, total as u16);
            packet.payload_mut().copy_from_slice(chunk);
            packet
        })
        .collect();
    Ok(fragments)
}
