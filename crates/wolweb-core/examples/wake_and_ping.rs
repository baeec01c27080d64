//! Example: Waking a Device and Waiting for It
//!
//! This example loads the device list from a wolweb service, sends a wake
//! request to one device and then polls until it answers pings or the
//! budget runs out.
//!
//! Run with: `cargo run --example wake_and_ping -- <DEVICE_ADDRESS> [BASE_URL]`

use std::env;
use std::sync::Arc;

use wolweb_core::{ActionKind, ClientConfig, DeviceBoard, DisposeGuard};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(address) = args.get(1) else {
        eprintln!("Usage: {} <DEVICE_ADDRESS> [BASE_URL]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF http://localhost:8951", args[0]);
        std::process::exit(1);
    };
    let config = match args.get(2) {
        Some(base_url) => ClientConfig::with_base_url(base_url.as_str()),
        None => ClientConfig::load_default()?,
    };
    config.validate()?;

    let board = DeviceBoard::new(Arc::new(config.transport()?), config.board_options())?;
    let report = board.refresh().await?;
    println!("Loaded {} device(s)", report.added.len());
    let address = board.resolve(address)?;

    let device = board.device(&address)?;
    println!("Waking {}...", device.display_name());
    board.wake(&address)?.join().await;
    println!("Wake: {}", board.status(&address, ActionKind::Wake)?);

    if !device.is_pingable() {
        println!("No host configured, not pinging");
        return Ok(());
    }

    let poll = DisposeGuard::new(board.begin_ping(&address)?);
    if let Some(handle) = poll.get() {
        let phase = handle.finished().await;
        println!("Poll finished: {:?}", phase);
    }

    let status = board.status(&address, ActionKind::Ping)?;
    match status.failure() {
        Some(reason) => println!("Ping failed: {}", reason.message()),
        None => println!("Ping: {}", status),
    }

    Ok(())
}
