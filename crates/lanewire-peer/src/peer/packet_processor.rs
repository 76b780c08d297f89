use std::{convert::TryFrom, time::Instant};

use lanewire_core::packet::{Packet, PacketKind};
use lanewire_protocol::{
    merge::merged_entries,
    messages::{self, ConnectRequest},
    Channel, DeliveryMethod,
};
use tracing::{debug, trace, warn};

use super::Peer;
use crate::{
    peer_event::{Action, PeerEvent},
    peer_state::{DisconnectReason, PeerState},
};

impl Peer {
    /// Processes one datagram received from the remote endpoint.
    pub fn process_packet(&mut self, packet: Packet, time: Instant) -> Vec<Action> {
        if self.state.is_disconnected() {
            self.pool.release(packet);
            return Vec::new();
        }
        self.last_heard = time;
        self.statistics.record_received(packet.len());

        if packet.kind() == PacketKind::Merged {
            self.process_merged(packet, time);
        } else {
            self.process_single(packet, time);
        }
        self.drain_actions()
    }

    fn process_merged(&mut self, merged: Packet, time: Instant) {
        let mut inner = Vec::new();
        for entry in merged_entries(&merged) {
            let parsed = entry.and_then(|bytes| self.pool.acquire_from_wire(bytes));
            match parsed {
                Ok(packet) if packet.kind() == PacketKind::Merged => {
                    warn!("dropping nested merged packet from {}", self.remote_address);
                    self.pool.release(packet);
                }
                Ok(packet) => inner.push(packet),
                Err(error) => {
                    warn!("dropping rest of merged packet from {}: {}", self.remote_address, error);
                    break;
                }
            }
        }
        self.pool.release(merged);
        for packet in inner {
            self.process_single(packet, time);
        }
    }

    fn process_single(&mut self, packet: Packet, time: Instant) {
        match packet.kind() {
            PacketKind::Unreliable
            | PacketKind::Sequenced
            | PacketKind::Reliable
            | PacketKind::ReliableOrdered => self.process_data(packet, time),
            PacketKind::AckReliable => self.reliable_unordered.process_ack(packet, &self.pool),
            PacketKind::AckReliableOrdered => self.reliable_ordered.process_ack(packet, &self.pool),
            PacketKind::Ping => {
                let mut pong = self.pool.acquire(PacketKind::Pong, 0);
                pong.set_sequence(packet.sequence());
                self.pool.release(packet);
                self.outbox.send_direct(pong);
            }
            PacketKind::Pong => {
                if let Some(avg_rtt) = self.round_trip.on_pong(packet.sequence(), time) {
                    self.flow.on_rtt_sample(avg_rtt);
                    self.events.push(PeerEvent::LatencyUpdated((avg_rtt / 2.0) as u32));
                }
                self.pool.release(packet);
            }
            PacketKind::ConnectRequest => self.process_connect_request(packet),
            PacketKind::ConnectAccept => self.process_connect_accept(packet),
            PacketKind::Disconnect => self.process_disconnect(packet),
            PacketKind::MtuCheck => {
                let probe = messages::decode_mtu_tier(&packet);
                match probe {
                    Ok(_) => {
                        let mut reply = packet;
                        reply.set_kind(PacketKind::MtuOk);
                        self.outbox.send_direct(reply);
                    }
                    Err(error) => {
                        warn!("dropping MTU probe from {}: {}", self.remote_address, error);
                        self.pool.release(packet);
                    }
                }
            }
            PacketKind::MtuOk => {
                match messages::decode_mtu_tier(&packet) {
                    Ok(tier) => {
                        if self.pmtu.process_reply(tier) {
                            self.outbox.set_mtu(self.pmtu.mtu());
                        }
                    }
                    Err(error) => warn!("dropping MTU confirmation from {}: {}", self.remote_address, error),
                }
                self.pool.release(packet);
            }
            kind => {
                trace!("ignoring {:?} packet from {}", kind, self.remote_address);
                self.pool.release(packet);
            }
        }
    }

    fn process_connect_request(&mut self, packet: Packet) {
        let request = ConnectRequest::decode(&packet);
        self.pool.release(packet);
        let request = match request {
            Ok(request) => request,
            Err(error) => {
                warn!("dropping connect request from {}: {}", self.remote_address, error);
                return;
            }
        };
        if request.connection_id < self.connection_id {
            trace!("ignoring outdated connect request from {}", self.remote_address);
            return;
        }

        self.connection_id = request.connection_id;
        self.send_connect_accept();
        if self.state == PeerState::Handshaking {
            debug!("connected to {} by its own request", self.remote_address);
            self.state = PeerState::Connected;
            self.events.push(PeerEvent::Connected);
        }
    }

    fn process_connect_accept(&mut self, packet: Packet) {
        let accepted = messages::decode_connect_accept(&packet);
        self.pool.release(packet);
        match accepted {
            Ok(id) if self.state == PeerState::Handshaking && id == self.connection_id => {
                debug!("connected to {}", self.remote_address);
                self.state = PeerState::Connected;
                self.events.push(PeerEvent::Connected);
            }
            Ok(_) => trace!("ignoring connect accept from {}", self.remote_address),
            Err(error) => warn!("dropping connect accept from {}: {}", self.remote_address, error),
        }
    }

    fn process_disconnect(&mut self, packet: Packet) {
        match messages::decode_disconnect(&packet) {
            Ok((id, data)) if id == self.connection_id => {
                let data = data.to_vec();
                self.close(DisconnectReason::RemoteConnectionClose, data);
            }
            Ok((id, _)) => trace!("ignoring disconnect for connection {} from {}", id, self.remote_address),
            Err(error) => warn!("dropping disconnect from {}: {}", self.remote_address, error),
        }
        self.pool.release(packet);
    }

    fn process_data(&mut self, packet: Packet, time: Instant) {
        if self.state != PeerState::Connected {
            trace!("dropping data from {} before the handshake completed", self.remote_address);
            self.pool.release(packet);
            return;
        }
        let Ok(method) = DeliveryMethod::try_from(packet.kind()) else {
            self.pool.release(packet);
            return;
        };

        let mut delivered = Vec::new();
        let channel: &mut dyn Channel = match method {
            DeliveryMethod::Unreliable => &mut self.unreliable,
            DeliveryMethod::Sequenced => &mut self.sequenced,
            DeliveryMethod::ReliableUnordered => &mut self.reliable_unordered,
            DeliveryMethod::ReliableOrdered => &mut self.reliable_ordered,
        };
        channel.on_packet_arrived(packet, &self.pool, &mut delivered);

        for packet in delivered {
            if !packet.is_fragmented() {
                self.events.push(PeerEvent::Received { method, payload: packet.payload().to_vec() });
                self.pool.release(packet);
                continue;
            }
            match self.fragments.insert(packet, &self.pool, time) {
                Ok(Some(payload)) => self.events.push(PeerEvent::Received { method, payload }),
                Ok(None) => {}
                Err(error) => warn!("dropping fragmented message from {}: {}", self.remote_address, error),
            }
        }
    }
}
