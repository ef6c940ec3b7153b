// Keyboard teleop for a star base: WASD move, Z/X rotate, R/F speed, Q quit
//
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use canboard_zenoh_runtime::config::TOPIC_CMD_DRIVE;
use canboard_zenoh_runtime::messages::DriveCommand;

const SPEED_LIMITS: [u8; 3] = [30, 70, 127];
const ROTATION: f32 = 40.0; // motor units added to every wheel
const INPUT_TIMEOUT_MS: u64 = 100; // Stop after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

/// Direction of travel for a key, 0 = forward, clockwise positive
fn key_angle(key: char) -> Option<f32> {
    match key {
        'w' => Some(0.0),
        'd' => Some(90.0),
        's' => Some(180.0),
        'a' => Some(-90.0),
        _ => None,
    }
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut limit_idx: usize = 0;

    let mut speed = 0.0;
    let mut angle_deg = 0.0;
    let mut rotation = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char(c) if pressed && key_angle(c).is_some() => {
                        angle_deg = key_angle(c).unwrap_or(0.0);
                        speed = SPEED_LIMITS[limit_idx] as f32;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('z') if pressed => {
                        rotation = -ROTATION;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        rotation = ROTATION;
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        limit_idx = (limit_idx + 1).min(SPEED_LIMITS.len() - 1);
                        print_speed(limit_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        limit_idx = limit_idx.saturating_sub(1);
                        print_speed(limit_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            speed = 0.0;
            rotation = 0.0;
        }

        // Always publish at ~50Hz, the runtime watchdog stops the base otherwise
        let cmd = DriveCommand::Star {
            speed,
            angle_deg,
            rotation,
            speed_limit: SPEED_LIMITS[limit_idx],
        };
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    publisher.put(serde_json::to_string(&DriveCommand::Stop)?).await?;
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} (limit {})", label, SPEED_LIMITS[idx]);
}
