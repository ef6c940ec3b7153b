// Message types exchanged with the runtime over zenoh

use serde::{Deserialize, Serialize};

use crate::board::BoardKind;

// Command from teleop/scripts -> runtime
// The layout tag must match the drivetrain the topology configures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum DriveCommand {
    Differential {
        left: i16,
        right: i16,
        #[serde(default)]
        lateral: i16,
        speed_limit: u8,
    },
    Star {
        speed: f32,
        angle_deg: f32,
        rotation: f32,
        speed_limit: u8,
    },
    Stop,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

/// Liveness summary of one board group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardHealth {
    pub name: String,
    pub kind: BoardKind,
    pub registered: usize,
    pub alive: usize,
    pub gap: bool,
}

// Runtime -> monitoring, once per loop tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusHealth {
    pub runtime: RuntimeHealth,
    pub boards: Vec<BoardHealth>,
}
