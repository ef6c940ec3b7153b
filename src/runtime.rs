// 50 Hz loop with watchdog
// Drive commands arrive over zenoh; if they stop arriving the drivetrain is
// stopped, so a crashed teleop cannot leave the robot driving.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

use crate::can::{Bus, NullTransport, SlcanTransport, SystemClock, TracingErrorSink};
use crate::config::{CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_DRIVE, TOPIC_HEALTH, Topology};
use crate::fleet::Fleet;
use crate::messages::{BusHealth, DriveCommand, RuntimeHealth};

/// How the runtime reaches the bus
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub port: String,
    pub bitrate: u32,
    pub topology: Option<PathBuf>,
    // Log frames instead of opening the adapter
    pub dry_run: bool,
}

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: DriveCommand) {
        info!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Command to apply this tick, `Stop` once the watchdog fires
    fn compute_command(&mut self) -> DriveCommand {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            DriveCommand::Stop
        } else if let Some(ref cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            cmd.clone()
        } else {
            self.health = RuntimeHealth::CmdStale;
            DriveCommand::Stop
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn open_fleet(options: &RunOptions) -> Result<Fleet, Box<dyn std::error::Error + Send + Sync>> {
    let topology = match &options.topology {
        Some(path) => {
            info!("Loading topology from {}", path.display());
            Topology::load(path)?
        }
        None => {
            info!("No topology given, using the built-in star base");
            Topology::default()
        }
    };

    let clock = Rc::new(SystemClock::new());
    let errors = Rc::new(TracingErrorSink);
    let bus = if options.dry_run {
        warn!("Dry run: frames are logged, nothing is sent");
        Bus::new(NullTransport, clock, errors)
    } else {
        let transport = SlcanTransport::open(&options.port, options.bitrate)?;
        Bus::new(transport, clock, errors)
    }
    .shared();

    let fleet = Fleet::from_topology(&topology, &bus)?;
    fleet.scan_all()?;
    Ok(fleet)
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fleet = open_fleet(&options)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!("Publishing to: {}", TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Drive (includes watchdog logic)
        let command = runtime.compute_command();
        if let Err(e) = fleet.apply(&command) {
            warn!("Drive command failed: {}", e);
        }

        // 3. Service frames the boards sent since the last tick
        fleet.dispatch_inbound();

        // 4. Publish health
        let health = BusHealth {
            runtime: runtime.health(),
            boards: fleet.health(),
        };
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_until_first_command() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.compute_command(), DriveCommand::Stop);
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_command_is_applied() {
        let mut runtime = Runtime::new();
        let cmd = DriveCommand::Star {
            speed: 30.0,
            angle_deg: 0.0,
            rotation: 0.0,
            speed_limit: 60,
        };
        runtime.on_command(cmd.clone());
        assert_eq!(runtime.compute_command(), cmd);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_stops_old_command() {
        let mut runtime = Runtime::new();
        runtime.on_command(DriveCommand::Differential {
            left: 50,
            right: 50,
            lateral: 0,
            speed_limit: 100,
        });
        runtime.cmd_received_at = Instant::now() - CMD_TIMEOUT - Duration::from_millis(1);
        assert_eq!(runtime.compute_command(), DriveCommand::Stop);
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }
}
