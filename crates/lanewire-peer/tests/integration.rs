//! Integration tests for the lanewire-peer crate.
//!
//! Two peers are wired together through an in-memory link driven by manually advanced
//! instants, so handshake, retransmission and reassembly run exactly as they would over a
//! socket.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use lanewire_core::{config::Config, packet::Packet, packet::PacketKind, packet_pool::PacketPool};
use lanewire_peer::{Action, DisconnectReason, Peer, PeerEvent};
use lanewire_protocol::{messages::ConnectRequest, DeliveryMethod};
use rand::{rngs::StdRng, Rng, SeedableRng};

const TICK: Duration = Duration::from_millis(15);

fn client_addr() -> SocketAddr {
    "127.0.0.1:7001".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "127.0.0.1:7000".parse().unwrap()
}

fn split(actions: Vec<Action>) -> (Vec<Packet>, Vec<PeerEvent>) {
    let mut packets = Vec::new();
    let mut events = Vec::new();
    for action in actions {
        match action {
            Action::Send(packet) => packets.push(packet),
            Action::Emit(event) => events.push(event),
        }
    }
    (packets, events)
}

/// Moves datagrams over the link, optionally dropping and duplicating some of them.
fn deliver(
    pool: &PacketPool,
    packets: Vec<Packet>,
    to: &mut Peer,
    time: Instant,
    rng: Option<&mut StdRng>,
    replies: &mut Vec<Packet>,
    events: &mut Vec<PeerEvent>,
) {
    let mut rng = rng;
    for packet in packets {
        let copies = match rng.as_deref_mut() {
            Some(rng) => {
                let roll: f64 = rng.gen();
                if roll < 0.3 {
                    0
                } else if roll < 0.37 {
                    2
                } else {
                    1
                }
            }
            None => 1,
        };
        for _ in 0..copies {
            let received = pool.acquire_from_wire(packet.as_bytes()).unwrap();
            let (sent, emitted) = split(to.process_packet(received, time));
            replies.extend(sent);
            events.extend(emitted);
        }
        pool.release(packet);
    }
}

fn connected_pair(config: &Config, pool: &Arc<PacketPool>, time: Instant) -> (Peer, Peer) {
    let (mut client, actions) = Peer::connect(server_addr(), config, pool.clone(), time).unwrap();
    let (mut packets, _) = split(actions);
    assert_eq!(packets.len(), 1);
    let request_packet = packets.remove(0);
    let request = ConnectRequest::decode(&request_packet).unwrap();
    pool.release(request_packet);

    let (server, actions) = Peer::accept(client_addr(), config, pool.clone(), &request, time);
    let (packets, events) = split(actions);
    assert_eq!(events, vec![PeerEvent::Connected]);

    let mut replies = Vec::new();
    let mut events = Vec::new();
    deliver(pool, packets, &mut client, time, None, &mut replies, &mut events);
    assert_eq!(events, vec![PeerEvent::Connected]);
    assert!(replies.is_empty());
    assert_eq!(client.connection_id(), server.connection_id());
    (client, server)
}

fn received_payloads(events: Vec<PeerEvent>) -> Vec<Vec<u8>> {
    events
        .into_iter()
        .filter_map(|event| match event {
            PeerEvent::Received { payload, .. } => Some(payload),
            _ => None,
        })
        .collect()
}

#[test]
fn test_handshake() {
    let pool = Arc::new(PacketPool::default());
    let (client, server) = connected_pair(&Config::default(), &pool, Instant::now());
    assert!(client.state().is_established());
    assert!(server.state().is_established());
}

#[test]
fn test_reliable_ordered_over_lossy_link() {
    let config = Config::default();
    let pool = Arc::new(PacketPool::default());
    let mut time = Instant::now();
    let (mut client, mut server) = connected_pair(&config, &pool, time);

    let expected: Vec<Vec<u8>> = (0..100).map(|i: u32| format!("message {}", i).into_bytes()).collect();
    for payload in &expected {
        client.send(payload, DeliveryMethod::ReliableOrdered).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(7);
    let mut to_server = Vec::new();
    let mut to_client = Vec::new();
    let mut received = Vec::new();
    for _ in 0..4000 {
        time += TICK;

        let (packets, _) = split(client.update(time));
        to_server.extend(packets);
        let mut events = Vec::new();
        deliver(&pool, std::mem::take(&mut to_server), &mut server, time, Some(&mut rng), &mut to_client, &mut events);
        received.extend(received_payloads(events));

        let (packets, _) = split(server.update(time));
        to_client.extend(packets);
        let mut ignored = Vec::new();
        deliver(&pool, std::mem::take(&mut to_client), &mut client, time, Some(&mut rng), &mut to_server, &mut ignored);

        if received.len() == expected.len() {
            break;
        }
    }

    assert_eq!(received, expected);
    assert!(client.statistics().packets_lost > 0);
    assert!(client.state().is_established());
}

#[test]
fn test_large_payload_is_fragmented_and_reassembled() {
    let mut config = Config::default();
    config.mtu_discovery = false;
    let pool = Arc::new(PacketPool::default());
    let mut time = Instant::now();
    let (mut client, mut server) = connected_pair(&config, &pool, time);

    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    client.send(&payload, DeliveryMethod::ReliableUnordered).unwrap();

    let mut received = Vec::new();
    for _ in 0..10 {
        time += TICK;
        let (packets, _) = split(client.update(time));
        assert!(packets.iter().all(|packet| packet.len() <= client.mtu()));
        let mut replies = Vec::new();
        let mut events = Vec::new();
        deliver(&pool, packets, &mut server, time, None, &mut replies, &mut events);
        received.extend(received_payloads(events));
        for reply in replies {
            pool.release(reply);
        }
    }
    assert_eq!(received, vec![payload]);
}

#[test]
fn test_sequenced_drops_stale_packets() {
    let pool = Arc::new(PacketPool::default());
    let mut time = Instant::now();
    let (mut client, mut server) = connected_pair(&Config::default(), &pool, time);

    for payload in [b"1", b"2", b"3"] {
        client.send(payload, DeliveryMethod::Sequenced).unwrap();
    }
    time += TICK;
    let (packets, _) = split(client.update(time));
    let mut sequenced: Vec<Packet> = Vec::new();
    for packet in packets {
        if packet.kind() == PacketKind::Sequenced {
            sequenced.push(packet);
        } else {
            pool.release(packet);
        }
    }
    assert_eq!(sequenced.len(), 3);
    sequenced.swap(0, 1);

    let mut replies = Vec::new();
    let mut events = Vec::new();
    deliver(&pool, sequenced, &mut server, time, None, &mut replies, &mut events);
    assert_eq!(received_payloads(events), vec![b"2".to_vec(), b"3".to_vec()]);
}

#[test]
fn test_remote_disconnect_carries_data() {
    let pool = Arc::new(PacketPool::default());
    let time = Instant::now();
    let (mut client, mut server) = connected_pair(&Config::default(), &pool, time);

    let (packets, events) = split(client.disconnect(b"bye"));
    assert_eq!(
        events,
        vec![PeerEvent::Disconnected { reason: DisconnectReason::DisconnectPeerCalled, data: Vec::new() }]
    );

    let mut replies = Vec::new();
    let mut events = Vec::new();
    deliver(&pool, packets, &mut server, time, None, &mut replies, &mut events);
    assert_eq!(
        events,
        vec![PeerEvent::Disconnected { reason: DisconnectReason::RemoteConnectionClose, data: b"bye".to_vec() }]
    );
    assert!(server.state().is_disconnected());
}

#[test]
fn test_merged_traffic_round_trip() {
    let mut config = Config::default();
    config.merge_enabled = true;
    let pool = Arc::new(PacketPool::default());
    let mut time = Instant::now();
    let (mut client, mut server) = connected_pair(&config, &pool, time);

    for i in 0..5u8 {
        client.send(&[i], DeliveryMethod::Unreliable).unwrap();
    }
    time += TICK;
    let (packets, _) = split(client.update(time));
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind(), PacketKind::Merged);

    let mut replies = Vec::new();
    let mut events = Vec::new();
    deliver(&pool, packets, &mut server, time, None, &mut replies, &mut events);
    assert_eq!(received_payloads(events), (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
}

#[test]
fn test_unacknowledged_reliable_data_disconnects_live_link() {
    let mut config = Config::default();
    config.max_resend_attempts = 5;
    config.ping_interval = Duration::from_millis(50);
    let pool = Arc::new(PacketPool::default());
    let start = Instant::now();
    let mut time = start;
    let (mut client, mut server) = connected_pair(&config, &pool, time);

    client.send(b"never acked", DeliveryMethod::ReliableOrdered).unwrap();

    let mut to_client = Vec::new();
    let mut received = Vec::new();
    let mut closed_at = None;
    while time < start + Duration::from_secs(2) {
        time += TICK;

        let (packets, client_events) = split(client.update(time));
        if client_events.contains(&PeerEvent::Disconnected { reason: DisconnectReason::Timeout, data: Vec::new() }) {
            closed_at = Some(time);
            for packet in packets {
                pool.release(packet);
            }
            break;
        }
        let mut events = Vec::new();
        deliver(&pool, packets, &mut server, time, None, &mut to_client, &mut events);
        received.extend(received_payloads(events));

        let (packets, _) = split(server.update(time));
        to_client.extend(packets);
        // Pings and pongs get through; acks never do.
        let (acks, traffic): (Vec<Packet>, Vec<Packet>) = std::mem::take(&mut to_client)
            .into_iter()
            .partition(|packet| matches!(packet.kind(), PacketKind::AckReliable | PacketKind::AckReliableOrdered));
        for ack in acks {
            pool.release(ack);
        }
        let mut ignored = Vec::new();
        let mut replies = Vec::new();
        deliver(&pool, traffic, &mut client, time, None, &mut replies, &mut ignored);
        let mut server_events = Vec::new();
        deliver(&pool, replies, &mut server, time, None, &mut to_client, &mut server_events);
        received.extend(received_payloads(server_events));
    }

    let closed_at = closed_at.expect("client kept resending forever");
    assert!(closed_at - start < config.disconnect_timeout);
    assert!(client.time_since_last_packet(closed_at) < Duration::from_millis(100));
    assert!(client.state().is_disconnected());
    assert_eq!(received, vec![b"never acked".to_vec()]);
    assert_eq!(client.statistics().packets_lost, u64::from(config.max_resend_attempts - 1));
}
