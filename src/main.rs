use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use canboard_zenoh_runtime::config::{CAN_BITRATE, CAN_PORT};
use canboard_zenoh_runtime::runtime::{self, RunOptions};

/// Drive CAN peripheral boards from zenoh commands
#[derive(Parser, Debug)]
#[command(name = "canboard-zenoh-runtime")]
struct Args {
    /// Serial port of the SLCAN adapter
    #[arg(long, default_value = CAN_PORT)]
    port: String,

    /// CAN bitrate in bit/s
    #[arg(long, default_value_t = CAN_BITRATE)]
    bitrate: u32,

    /// Board topology JSON (built-in star base if omitted)
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Log frames instead of opening the adapter
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let options = RunOptions {
        port: args.port,
        bitrate: args.bitrate,
        topology: args.topology,
        dry_run: args.dry_run,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
