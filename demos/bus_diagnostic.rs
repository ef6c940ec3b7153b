// Bus diagnostic: find out which boards answer
//
// Only pings and status requests are sent; no motor is driven.
//
// Usage: cargo run --example bus_diagnostic -- [port] [topology.json]
// Example: cargo run --example bus_diagnostic -- /dev/ttyACM0 topology.json

use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use canboard_zenoh_runtime::board::Target;
use canboard_zenoh_runtime::can::{Bus, SlcanTransport, SystemClock, TracingErrorSink};
use canboard_zenoh_runtime::config::{CAN_BITRATE, CAN_PORT, Topology};
use canboard_zenoh_runtime::fleet::Fleet;

// Time the boards get to answer firmware and FPS requests
const ANSWER_WINDOW: Duration = Duration::from_millis(200);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| CAN_PORT.to_string());
    let topology = match args.next() {
        Some(path) => Topology::load(Path::new(&path))?,
        None => Topology::default(),
    };

    println!("Board bus diagnostic (read-only)");
    println!("Adapter: {} at {} bit/s", port, CAN_BITRATE);
    println!();

    println!("Step 1: Opening adapter...");
    let transport = match SlcanTransport::open(&port, CAN_BITRATE) {
        Ok(transport) => {
            println!("  OK");
            transport
        }
        Err(e) => {
            println!("  Failed: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Check the adapter speaks SLCAN (Lawicel)");
            println!("  - Check the bus is terminated and powered");
            return Err(e.into());
        }
    };
    let bus = Bus::new(transport, Rc::new(SystemClock::new()), Rc::new(TracingErrorSink)).shared();
    let fleet = Fleet::from_topology(&topology, &bus)?;
    println!();

    println!("Step 2: Scanning...");
    fleet.scan_all()?;
    for board in fleet.boards() {
        let board = board.borrow();
        let group = board.group();
        println!("  === {} ===", group.name());
        for device in group.devices() {
            let state = if device.is_alive() { "alive" } else { "NO RESPONSE" };
            println!(
                "    {:<9} in 0x{:03X} out 0x{:03X}  {}",
                device.name(),
                device.can_id_in(),
                device.can_id_out(),
                state
            );
        }
        if board.gap_exists() {
            println!("    WARNING: alive device after a dead one, check the chain");
        }
    }
    println!();

    println!("Step 3: Firmware and FPS...");
    for board in fleet.boards() {
        let mut board = board.borrow_mut();
        board.group_mut().firmware_request(Target::All)?;
        board.group_mut().fps_request(Target::All)?;
        board.wait(ANSWER_WINDOW);
        let group = board.group();
        for device in group.devices().iter().filter(|d| d.is_alive()) {
            let firmware = device
                .firmware_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string());
            let fps = device
                .fps_last()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "no response".to_string());
            println!("    {:<9} firmware {}  FPS {}", device.name(), firmware, fps);
        }
    }
    println!();
    println!("Done.");
    Ok(())
}
