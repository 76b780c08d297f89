//! Simple client that sends messages to a Lanewire server and prints replies.
//!
//! Run the server first:
//! - cargo run -p lanewire --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p lanewire --example client -- 127.0.0.1:7777
//! - cargo run -p lanewire --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    time::{Duration, Instant},
};

use lanewire::{Config, DeliveryMethod, Host, NetEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9050".to_string()).parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args.next().unwrap_or_else(|| "300".into()).parse().unwrap_or(300);

    let mut config = Config::default();
    config.connect_key = "lanewire-demo".into();
    let mut host = Host::bind_any_with_config(config)?;
    host.start()?;
    let local = host.local_addr()?;
    println!("Lanewire client bound to {} -> sending {} messages to {} (every {}ms)", local, count, server_addr, interval_ms);

    host.connect(server_addr)?;
    let events = host.get_event_receiver();
    match events.recv_timeout(Duration::from_secs(6))? {
        NetEvent::PeerConnected(addr) => println!("[connect] {}", addr),
        other => {
            println!("connection failed: {:?}", other);
            return Ok(());
        }
    }

    for i in 0..count {
        let msg = format!("hello {} from {}", i, local);
        host.send(server_addr, msg.as_bytes(), DeliveryMethod::ReliableOrdered)?;

        let deadline = Instant::now() + Duration::from_millis(interval_ms);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            let Ok(event) = events.recv_timeout(left) else { break };
            match event {
                NetEvent::DataReceived { addr, payload, .. } => {
                    println!("[reply] from={} payload=\"{}\"", addr, String::from_utf8_lossy(&payload));
                }
                NetEvent::LatencyUpdated { latency_ms, .. } => println!("[latency] {}ms", latency_ms),
                other => println!("[event] {:?}", other),
            }
        }
    }

    host.disconnect(server_addr, b"bye")?;
    host.stop();
    println!("done, {:?}", host.statistics());
    Ok(())
}
