// All board groups on one bus plus the drivetrain bound to them

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::board::{
    Board, BoardError, BoardKind, MotorBoardGroup, SensorBoardGroup, SharedMotorBoard, SCAN_ALL,
};
use crate::can::{log_stray, SharedBus};
use crate::config::{BoardConfig, DriveConfig, DriveLayout, Topology, TopologyError};
use crate::messages::{BoardHealth, DriveCommand};
use crate::motor::{MotorGroupDifferential, MotorGroupStar, MotorSlot};

pub type SharedSensorBoard = Rc<RefCell<SensorBoardGroup>>;

pub enum Drive {
    Differential(MotorGroupDifferential),
    Star(MotorGroupStar),
}

impl Drive {
    pub fn stop(&self) -> Result<(), BoardError> {
        match self {
            Drive::Differential(drive) => drive.stop(),
            Drive::Star(drive) => drive.stop(),
        }
    }
}

pub struct Fleet {
    bus: SharedBus,
    motor_boards: Vec<SharedMotorBoard>,
    sensor_boards: Vec<SharedSensorBoard>,
    // Every group, in topology order, for inbound dispatch
    boards: Vec<Rc<RefCell<dyn Board>>>,
    drive: Option<Drive>,
}

impl Fleet {
    /// Register every device of the topology and bind the drivetrain
    pub fn from_topology(topology: &Topology, bus: &SharedBus) -> Result<Self, TopologyError> {
        topology.validate()?;
        let mut fleet = Self {
            bus: Rc::clone(bus),
            motor_boards: Vec::new(),
            sensor_boards: Vec::new(),
            boards: Vec::new(),
            drive: None,
        };

        for config in &topology.boards {
            match config.kind {
                BoardKind::Motor => {
                    let board = build_motor_board(config, bus)?.shared();
                    fleet.boards.push(Rc::clone(&board) as Rc<RefCell<dyn Board>>);
                    fleet.motor_boards.push(board);
                }
                BoardKind::Sensor => {
                    let board = Rc::new(RefCell::new(build_sensor_board(config, bus)?));
                    fleet.boards.push(Rc::clone(&board) as Rc<RefCell<dyn Board>>);
                    fleet.sensor_boards.push(board);
                }
            }
            info!(
                "{}: {} devices registered",
                config.name,
                config.devices.len()
            );
        }

        if let Some(drive) = &topology.drive {
            fleet.drive = Some(fleet.bind_drive(drive)?);
        }
        Ok(fleet)
    }

    fn bind_drive(&self, config: &DriveConfig) -> Result<Drive, TopologyError> {
        let mut slots = Vec::with_capacity(config.slots.len());
        for slot in &config.slots {
            let board = self.motor_board(&slot.board).ok_or_else(|| {
                TopologyError::Invalid(format!("drive uses unknown board {}", slot.board))
            })?;
            slots.push(MotorSlot::new(&board, slot.motor));
        }
        let slots: [MotorSlot; 4] = slots.try_into().map_err(|_| {
            TopologyError::Invalid("drive needs 4 slots".to_string())
        })?;
        Ok(match config.layout {
            DriveLayout::Differential => {
                let [left_1, left_2, right_1, right_2] = slots;
                Drive::Differential(MotorGroupDifferential::new(left_1, left_2, right_1, right_2))
            }
            DriveLayout::Star => Drive::Star(MotorGroupStar::new(slots)),
        })
    }

    pub fn motor_board(&self, name: &str) -> Option<SharedMotorBoard> {
        self.motor_boards
            .iter()
            .find(|b| b.borrow().group().name() == name)
            .cloned()
    }

    pub fn sensor_board(&self, name: &str) -> Option<SharedSensorBoard> {
        self.sensor_boards
            .iter()
            .find(|b| b.borrow().group().name() == name)
            .cloned()
    }

    pub fn boards(&self) -> &[Rc<RefCell<dyn Board>>] {
        &self.boards
    }

    pub fn drive(&self) -> Option<&Drive> {
        self.drive.as_ref()
    }

    /// Ping every dead device of every group
    pub fn scan_all(&self) -> Result<(), BoardError> {
        for board in &self.boards {
            board.borrow_mut().scan(SCAN_ALL)?;
        }
        for board in &self.boards {
            let board = board.borrow();
            let group = board.group();
            info!("{}: {}/{} alive", group.name(), group.alive_count(), group.len());
            if board.gap_exists() {
                warn!("{}: alive device after a dead one, check the wiring", group.name());
            }
        }
        Ok(())
    }

    /// Hand every received frame to the group whose device sent it
    pub fn dispatch_inbound(&self) -> usize {
        let frames = {
            let mut bus = self.bus.borrow_mut();
            bus.poll();
            bus.drain()
        };
        for frame in &frames {
            let claimed = self
                .boards
                .iter()
                .any(|board| board.borrow_mut().decode(frame));
            if !claimed {
                log_stray(frame);
            }
        }
        frames.len()
    }

    /// Drive with a command. A command for a layout other than the
    /// configured one stops the drivetrain.
    pub fn apply(&self, command: &DriveCommand) -> Result<(), BoardError> {
        let Some(drive) = &self.drive else {
            return Ok(());
        };
        match (drive, command) {
            (
                Drive::Differential(drive),
                &DriveCommand::Differential {
                    left,
                    right,
                    lateral,
                    speed_limit,
                },
            ) => drive.go(left, right, lateral, speed_limit),
            (
                Drive::Star(drive),
                &DriveCommand::Star {
                    speed,
                    angle_deg,
                    rotation,
                    speed_limit,
                },
            ) => drive.go(speed, angle_deg, rotation, speed_limit),
            (drive, DriveCommand::Stop) => drive.stop(),
            (drive, command) => {
                warn!("Command {:?} does not match the drivetrain, stopping", command);
                drive.stop()
            }
        }
    }

    pub fn health(&self) -> Vec<BoardHealth> {
        self.boards
            .iter()
            .map(|board| {
                let board = board.borrow();
                let group = board.group();
                BoardHealth {
                    name: group.name().to_string(),
                    kind: group.kind(),
                    registered: group.len(),
                    alive: group.alive_count(),
                    gap: board.gap_exists(),
                }
            })
            .collect()
    }
}

fn build_motor_board(config: &BoardConfig, bus: &SharedBus) -> Result<MotorBoardGroup, BoardError> {
    let mut board = MotorBoardGroup::new(&config.name, config.max_boards, config.devices_per_board, bus)
        .with_slow_scan(config.slow_scan)
        .with_measuring_mode_limit(config.measuring_mode_limit);
    for device in &config.devices {
        board.add(&device.name, device.can_in, device.can_out)?;
    }
    for &[a, b] in &config.swaps {
        board.group_mut().swap(a, b)?;
    }
    for &motor in &config.reversed {
        board.direction_change(motor)?;
    }
    Ok(board)
}

fn build_sensor_board(config: &BoardConfig, bus: &SharedBus) -> Result<SensorBoardGroup, BoardError> {
    let mut board = SensorBoardGroup::new(
        &config.name,
        config.max_boards,
        config.devices_per_board,
        config.readings_count,
        bus,
    )
    .with_slow_scan(config.slow_scan)
    .with_measuring_mode_limit(config.measuring_mode_limit);
    for device in &config.devices {
        board.add(&device.name, device.can_in, device.can_out)?;
    }
    for &[a, b] in &config.swaps {
        board.group_mut().swap(a, b)?;
    }
    Ok(board)
}
