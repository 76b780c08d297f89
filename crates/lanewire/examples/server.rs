//! Simple echo server using Lanewire.
//!
//! Run:
//! - cargo run -p lanewire --example server
//! - cargo run -p lanewire --example server -- 127.0.0.1:7777

use std::{env, net::SocketAddr};

use lanewire::{Config, Host, NetEvent};

fn parse_bind_addr() -> Option<SocketAddr> {
    let mut args = env::args().skip(1);
    args.next().and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = Config::default();
    config.max_connections = 16;
    config.connect_key = "lanewire-demo".into();
    // Uncomment to try features:
    // config.merge_enabled = true;
    // config.simulate_packet_loss = true;

    let bind_addr = match parse_bind_addr() {
        Some(addr) => addr,
        None => "127.0.0.1:9050".parse()?,
    };
    let mut host = Host::bind_with_config(bind_addr, config)?;
    host.start()?;
    println!("Lanewire echo server listening on {}", host.local_addr()?);

    let events = host.get_event_receiver();
    while let Ok(event) = events.recv() {
        match event {
            NetEvent::PeerConnected(addr) => println!("[connect] {}", addr),
            NetEvent::DataReceived { addr, method, payload } => {
                println!("[data] from={} method={:?} payload=\"{}\"", addr, method, String::from_utf8_lossy(&payload));
                if let Err(e) = host.send(addr, &payload, method) {
                    eprintln!("failed to queue echo: {}", e);
                }
            }
            NetEvent::PeerDisconnected { addr, reason, .. } => println!("[disconnect] {} ({:?})", addr, reason),
            NetEvent::LatencyUpdated { addr, latency_ms } => println!("[latency] {} {}ms", addr, latency_ms),
            NetEvent::NetworkError { addr, error } => eprintln!("[error] {:?} {:?}", addr, error),
        }
    }

    host.stop();
    Ok(())
}
