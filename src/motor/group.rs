// Drivetrains built from four motors, possibly on different boards

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use super::kinematics::{
    differential_wheel_speeds, heading_to, normalize_angle, star_wheel_speeds,
};
use crate::board::{Board, BoardError, SharedMotorBoard};
use crate::config::CONSERVATIVE_SPEED_LIMIT;

/// Heading error above which the robot only turns, in degrees
const TURN_ONLY_ERROR_DEG: f32 = 20.0;

/// Closed-loop controller supplied by the caller
pub trait PidController {
    fn calculate(&mut self, error: f32) -> f32;
}

/// One motor of a motor board
#[derive(Clone)]
pub struct MotorSlot {
    pub board: SharedMotorBoard,
    pub motor: usize,
}

impl MotorSlot {
    pub fn new(board: &SharedMotorBoard, motor: usize) -> Self {
        Self {
            board: Rc::clone(board),
            motor,
        }
    }

    fn speed_set(&self, speed: i8) -> Result<(), BoardError> {
        self.board.borrow_mut().speed_set(self.motor, speed, false)
    }
}

/// Up to four bound motors
#[derive(Clone, Default)]
pub struct MotorGroup {
    slots: [Option<MotorSlot>; 4],
}

impl MotorGroup {
    pub fn new(slots: [Option<MotorSlot>; 4]) -> Self {
        Self { slots }
    }

    pub fn slot(&self, index: usize) -> Option<&MotorSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn all_bound(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Speed 0 to the bound slots, up to the first unbound one. A failing
    /// motor does not keep the rest from stopping; the last error is returned.
    pub fn stop(&self) -> Result<(), BoardError> {
        let mut result = Ok(());
        for slot in self.slots.iter().map_while(Option::as_ref) {
            if let Err(e) = slot.speed_set(0) {
                warn!("Stopping motor {} failed: {}", slot.motor, e);
                result = Err(e);
            }
        }
        result
    }

    fn apply(&self, speeds: [i8; 4], settle: bool) -> Result<(), BoardError> {
        let mut result = Ok(());
        for (slot, speed) in self.slots.iter().zip(speeds) {
            let Some(slot) = slot else { continue };
            if let Err(e) = slot.speed_set(speed) {
                warn!("Speed {} to motor {} failed: {}", speed, slot.motor, e);
                result = Err(e);
            }
            if settle {
                let board = slot.board.borrow();
                board.group().clock().sleep(Duration::from_millis(1));
            }
        }
        result
    }
}

/// Tank drive: two motors per side
pub struct MotorGroupDifferential {
    motors: MotorGroup,
}

impl MotorGroupDifferential {
    pub fn new(left_1: MotorSlot, left_2: MotorSlot, right_1: MotorSlot, right_2: MotorSlot) -> Self {
        Self {
            motors: MotorGroup::new([Some(left_1), Some(left_2), Some(right_1), Some(right_2)]),
        }
    }

    /// Drive with side speeds and a lateral component. Does nothing unless
    /// all four motors are bound; a limit of 0 stops.
    pub fn go(&self, left: i16, right: i16, lateral: i16, speed_limit: u8) -> Result<(), BoardError> {
        if !self.motors.all_bound() {
            warn!("Differential drive is missing motors");
            return Ok(());
        }
        if speed_limit == 0 {
            return self.motors.stop();
        }
        let speeds = differential_wheel_speeds(left, right, lateral, speed_limit);
        debug!("Differential {:?}", speeds);
        // Boards drop commands that arrive back to back
        self.motors.apply(speeds, true)
    }

    pub fn stop(&self) -> Result<(), BoardError> {
        self.motors.stop()
    }

    pub fn motors(&self) -> &MotorGroup {
        &self.motors
    }
}

/// Omni drive with four wheels at 90 degree spacing
pub struct MotorGroupStar {
    motors: MotorGroup,
}

impl MotorGroupStar {
    pub fn new(slots: [MotorSlot; 4]) -> Self {
        Self {
            motors: MotorGroup::new(slots.map(Some)),
        }
    }

    /// Move in direction `angle_deg` while turning with `rotation`
    pub fn go(&self, speed: f32, angle_deg: f32, rotation: f32, speed_limit: u8) -> Result<(), BoardError> {
        if self.motors.slot(0).is_none() {
            return Ok(());
        }
        if speed_limit == 0 {
            return self.motors.stop();
        }
        let speeds = star_wheel_speeds(speed, angle_deg, rotation, speed_limit);
        debug!("Star {:?}", speeds);
        self.motors.apply(speeds, false)
    }

    /// One closed-loop step towards a target pose. Errors are lateral,
    /// forward and heading (degrees). Large heading errors are turned out
    /// first, without translation.
    pub fn go_to_eliminate_errors(
        &self,
        error_x: f32,
        error_y: f32,
        error_rotation: f32,
        pid_xy: &mut dyn PidController,
        pid_rotation: &mut dyn PidController,
    ) -> Result<(), BoardError> {
        let heading = heading_to(error_x, error_y);
        let error_rotation = normalize_angle(error_rotation);
        let speed = if error_rotation.abs() < TURN_ONLY_ERROR_DEG {
            pid_xy.calculate(error_x.abs() + error_y.abs())
        } else {
            0.0
        };
        let rotation = pid_rotation.calculate(error_rotation);
        self.go(speed, heading, rotation, CONSERVATIVE_SPEED_LIMIT)
    }

    pub fn stop(&self) -> Result<(), BoardError> {
        self.motors.stop()
    }

    pub fn motors(&self) -> &MotorGroup {
        &self.motors
    }
}
