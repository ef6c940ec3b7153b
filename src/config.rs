// Timeouts, topics, bus settings and the board topology file
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::{BoardError, BoardKind};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "boards/cmd/drive"; // drive commands
pub const TOPIC_HEALTH: &str = "boards/state/health"; // bus health

// CAN adapter
pub const CAN_PORT: &str = "/dev/ttyACM0";
pub const CAN_BITRATE: u32 = 250_000;

// Board timing
// A reading older than this means the device stopped streaming
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);
pub const START_TRIES: u32 = 8;
// How long one start attempt waits for a reading
pub const START_CONFIRM_WINDOW: Duration = Duration::from_millis(50);
// A reading younger than this confirms a start
pub const READING_FRESHNESS: Duration = Duration::from_millis(100);
pub const PRE_SCAN_DELAY: Duration = Duration::from_millis(5);
pub const SCAN_PAUSE: Duration = Duration::from_millis(10);
pub const SLOW_SCAN_FACTOR: u32 = 3;

// Speed limit for closed-loop positioning
pub const CONSERVATIVE_SPEED_LIMIT: u8 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Cannot read topology: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid topology JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid topology: {0}")]
    Invalid(String),

    #[error(transparent)]
    Board(#[from] BoardError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub can_in: u16,
    pub can_out: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub kind: BoardKind,
    pub max_boards: usize,
    pub devices_per_board: usize,
    #[serde(default)]
    pub slow_scan: bool,
    #[serde(default)]
    pub measuring_mode_limit: u8,
    // Sensor boards only
    #[serde(default = "default_readings_count")]
    pub readings_count: usize,
    pub devices: Vec<DeviceConfig>,
    // Pairs of ordinals whose CAN ids are exchanged after registration
    #[serde(default)]
    pub swaps: Vec<[usize; 2]>,
    // Motor ordinals that turn the other way
    #[serde(default)]
    pub reversed: Vec<usize>,
}

fn default_readings_count() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveLayout {
    Differential,
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub board: String,
    pub motor: usize,
}

/// Drivetrain binding. Differential slots are left 1, left 2, right 1, right 2;
/// star slots are the four wheels in mounting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub layout: DriveLayout,
    pub slots: Vec<SlotConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub boards: Vec<BoardConfig>,
    #[serde(default)]
    pub drive: Option<DriveConfig>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, TopologyError> {
        let topology: Topology = serde_json::from_str(text)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Checks that do not need a bus: unique board names, drive slots that
    /// point at registered motors
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (i, board) in self.boards.iter().enumerate() {
            if self.boards[..i].iter().any(|b| b.name == board.name) {
                return Err(TopologyError::Invalid(format!(
                    "duplicate board name {}",
                    board.name
                )));
            }
        }

        let Some(drive) = &self.drive else {
            return Ok(());
        };
        if drive.slots.len() != 4 {
            return Err(TopologyError::Invalid(format!(
                "drive needs 4 slots, got {}",
                drive.slots.len()
            )));
        }
        for slot in &drive.slots {
            let board = self
                .boards
                .iter()
                .find(|b| b.name == slot.board)
                .ok_or_else(|| {
                    TopologyError::Invalid(format!("drive uses unknown board {}", slot.board))
                })?;
            if board.kind != BoardKind::Motor {
                return Err(TopologyError::Invalid(format!(
                    "drive board {} is not a motor board",
                    slot.board
                )));
            }
            if slot.motor >= board.devices.len() {
                return Err(TopologyError::Invalid(format!(
                    "drive uses motor {} of {}, which has {} motors",
                    slot.motor,
                    slot.board,
                    board.devices.len()
                )));
            }
        }
        Ok(())
    }
}

impl Default for Topology {
    /// One 4-motor board driving a star base
    fn default() -> Self {
        let base: u16 = 0x230;
        let devices = (0..4u16)
            .map(|k| DeviceConfig {
                name: format!("Mot-{}", k),
                can_in: base + 2 * k,
                can_out: base + 2 * k + 1,
            })
            .collect();
        Self {
            boards: vec![BoardConfig {
                name: "mot4x3.6".to_string(),
                kind: BoardKind::Motor,
                max_boards: 1,
                devices_per_board: 4,
                slow_scan: false,
                measuring_mode_limit: 0,
                readings_count: default_readings_count(),
                devices,
                swaps: Vec::new(),
                reversed: Vec::new(),
            }],
            drive: Some(DriveConfig {
                layout: DriveLayout::Star,
                slots: (0..4)
                    .map(|motor| SlotConfig {
                        board: "mot4x3.6".to_string(),
                        motor,
                    })
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_is_valid() {
        let topology = Topology::default();
        assert!(topology.validate().is_ok());
        assert_eq!(topology.boards[0].devices[3].can_in, 0x236);
        assert_eq!(topology.boards[0].devices[3].can_out, 0x237);
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{
            "boards": [{
                "name": "ref6x",
                "kind": "sensor",
                "max_boards": 2,
                "devices_per_board": 1,
                "devices": [{"name": "Ref-0", "can_in": 352, "can_out": 353}]
            }]
        }"#;
        let topology = Topology::from_json(json).unwrap();
        let board = &topology.boards[0];
        assert_eq!(board.kind, BoardKind::Sensor);
        assert_eq!(board.readings_count, 1);
        assert!(!board.slow_scan);
        assert!(topology.drive.is_none());
    }

    #[test]
    fn test_drive_slot_must_exist() {
        let mut topology = Topology::default();
        if let Some(drive) = topology.drive.as_mut() {
            drive.slots[2].motor = 7;
        }
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::Invalid(_))
        ));
    }

    #[test]
    fn test_duplicate_board_names_rejected() {
        let mut topology = Topology::default();
        let copy = topology.boards[0].clone();
        topology.boards.push(copy);
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::Invalid(_))
        ));
    }

    #[test]
    fn test_sample_topology_file() {
        let topology = Topology::from_json(include_str!("../topology.json")).unwrap();
        assert_eq!(topology.boards.len(), 2);
        assert_eq!(topology.boards[0].swaps, vec![[2, 3]]);
        assert_eq!(
            topology.drive.map(|d| d.layout),
            Some(DriveLayout::Differential)
        );
    }

    #[test]
    fn test_bad_json_is_reported() {
        assert!(matches!(
            Topology::from_json("{\"boards\": 3}"),
            Err(TopologyError::Json(_))
        ));
    }
}
