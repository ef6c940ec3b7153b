// Motor controller boards: speed commands, encoder readings, startup check

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::group::{BoardGroup, BoardKind};
use super::{Board, BoardError, Target};
use crate::can::{CanFrame, SharedBus};
use crate::config::{INACTIVITY_TIMEOUT, READING_FRESHNESS, START_CONFIRM_WINDOW, START_TRIES};
use crate::protocol::{self, Command};

/// Motor boards are shared between the fleet and the drivetrain
pub type SharedMotorBoard = Rc<RefCell<MotorBoardGroup>>;

pub const MAX_SPEED: i8 = 127;

const SWEEP_STEP: Duration = Duration::from_millis(20);
const SWEEP_LOG_INTERVAL_MS: u64 = 300;
const SWEEP_PEAK: i8 = 100;

#[derive(Debug, Clone, Default)]
struct MotorState {
    encoder: u32,
    reversed: bool,
    // Last speed put on the wire, before reversal
    last_speed: Option<i8>,
}

pub struct MotorBoardGroup {
    group: BoardGroup,
    motors: Vec<MotorState>,
}

impl MotorBoardGroup {
    pub fn new(name: &str, max_boards: usize, motors_per_board: usize, bus: &SharedBus) -> Self {
        Self {
            group: BoardGroup::new(name, BoardKind::Motor, max_boards, motors_per_board, bus),
            motors: Vec::new(),
        }
    }

    pub fn with_slow_scan(mut self, slow: bool) -> Self {
        self.group.set_slow_scan(slow);
        self
    }

    pub fn with_measuring_mode_limit(mut self, limit: u8) -> Self {
        self.group.set_measuring_mode_limit(limit);
        self
    }

    pub fn shared(self) -> SharedMotorBoard {
        Rc::new(RefCell::new(self))
    }

    /// Register a motor; see `BoardGroup::add`
    pub fn add(&mut self, name: &str, can_in: u16, can_out: u16) -> Result<usize, BoardError> {
        let ordinal = self.group.add(name, can_in, can_out)?;
        self.motors.push(MotorState::default());
        Ok(ordinal)
    }

    fn state(&self, motor: usize) -> Result<&MotorState, BoardError> {
        self.group.device(motor)?;
        self.motors
            .get(motor)
            .ok_or_else(|| BoardError::NoSuchDevice {
                board: self.group.name().to_string(),
                ordinal: motor,
            })
    }

    fn state_mut(&mut self, motor: usize) -> Result<&mut MotorState, BoardError> {
        self.group.device(motor)?;
        let board = self.group.name().to_string();
        self.motors
            .get_mut(motor)
            .ok_or(BoardError::NoSuchDevice { board, ordinal: motor })
    }

    /// Set the speed of one motor, -127..=127. Unless forced, a speed equal
    /// to the last one sent is not sent again.
    pub fn speed_set(&mut self, motor: usize, speed: i8, force: bool) -> Result<(), BoardError> {
        let speed = speed.clamp(-MAX_SPEED, MAX_SPEED);
        let state = self.state_mut(motor)?;
        if !force && state.last_speed == Some(speed) {
            return Ok(());
        }
        let signed = if state.reversed { -speed } else { speed };
        let wire = (signed as i16 + 128) as u8;
        self.group.message_send(motor, Command::SpeedSet, &[wire])?;
        self.state_mut(motor)?.last_speed = Some(speed);
        Ok(())
    }

    /// Flip the turning direction of a motor for all later speed commands
    pub fn direction_change(&mut self, motor: usize) -> Result<(), BoardError> {
        let state = self.state_mut(motor)?;
        state.reversed = !state.reversed;
        // The cached speed now means the opposite on the wire
        state.last_speed = None;
        Ok(())
    }

    pub fn is_reversed(&self, motor: usize) -> Result<bool, BoardError> {
        Ok(self.state(motor)?.reversed)
    }

    fn has_fresh_reading(&self, motor: usize, max_age: Duration) -> bool {
        let now = self.group.now_ms();
        self.group
            .device(motor)
            .ok()
            .and_then(|d| d.last_reading_at_ms())
            .is_some_and(|at| now.saturating_sub(at) <= max_age.as_millis() as u64)
    }

    /// Make sure the encoder is streaming. A motor that reported within the
    /// inactivity timeout counts as started; otherwise streaming is started
    /// again until a fresh reading arrives or the tries run out.
    pub fn started(&mut self, motor: usize) -> bool {
        if self.has_fresh_reading(motor, INACTIVITY_TIMEOUT) {
            return true;
        }
        let window = START_CONFIRM_WINDOW.as_millis() as u64;
        for attempt in 1..=START_TRIES {
            if let Err(e) = self.group.start(Target::One(motor), 0, None) {
                warn!("Start failed: {}", e);
                return false;
            }
            let opened = self.group.now_ms();
            loop {
                self.pump();
                if self.has_fresh_reading(motor, READING_FRESHNESS) {
                    debug!("Motor {} started after {} tries", motor, attempt);
                    return true;
                }
                if self.group.now_ms().saturating_sub(opened) >= window {
                    break;
                }
                self.group.delay(Duration::from_millis(1));
            }
        }
        if let Ok(device) = self.group.device(motor) {
            warn!("{} dead", device.name());
        }
        false
    }

    /// Encoder count of a motor, `None` if it is dead or does not stream
    pub fn reading(&mut self, motor: usize) -> Option<u32> {
        if !self.is_alive_optionally_rescan(Target::One(motor), true) {
            return None;
        }
        if !self.started(motor) {
            return None;
        }
        self.state(motor).ok().map(|s| s.encoder)
    }

    /// Log the encoder counts of all alive motors on one line
    pub fn readings_print(&self) -> String {
        let line = self
            .group
            .devices()
            .iter()
            .filter(|d| d.is_alive())
            .map(|d| format!("{}: {}", d.name(), self.motors[d.ordinal()].encoder))
            .collect::<Vec<_>>()
            .join(" ");
        info!("Encoders: {}", line);
        line
    }

    /// Zero every motor and stop its measurements, alive or not
    pub fn stop_all(&mut self) -> Result<(), BoardError> {
        let mut result = Ok(());
        for motor in 0..self.group.len() {
            if let Err(e) = self.speed_set(motor, 0, true) {
                result = Err(e);
            }
        }
        self.wait(Duration::from_millis(2));
        for motor in 0..self.group.len() {
            if let Err(e) = self.group.message_send(motor, Command::MeasureStop, &[]) {
                result = Err(e);
            }
            if let Ok(device) = self.group.device_mut(motor) {
                device.last_reading_at_ms = None;
            }
        }
        self.wait(Duration::from_millis(3));
        result
    }

    /// Spin motors for bench testing until `abort` returns true.
    ///
    /// With no fixed speed the motors ramp 0 -> 100 -> -100 -> 0 in 20 ms
    /// steps. Encoders are started once per motor and stopped at the end.
    pub fn sweep_test(
        &mut self,
        target: Target,
        fixed_speed: Option<i8>,
        abort: &mut dyn FnMut() -> bool,
    ) -> Result<(), BoardError> {
        let motors = self.group.targets(target)?;
        for &motor in &motors {
            if self.is_alive_optionally_rescan(Target::One(motor), false) {
                self.started(motor);
            }
        }

        let mut last_log = self.group.now_ms();
        'sweep: loop {
            let steps: Box<dyn Iterator<Item = i8>> = match fixed_speed {
                Some(speed) => Box::new(std::iter::once(speed)),
                None => Box::new(
                    (0..=SWEEP_PEAK)
                        .chain((-SWEEP_PEAK..SWEEP_PEAK).rev())
                        .chain(-SWEEP_PEAK + 1..=0),
                ),
            };
            for speed in steps {
                for &motor in &motors {
                    self.speed_set(motor, speed, false)?;
                }
                self.wait(SWEEP_STEP);
                let now = self.group.now_ms();
                if now.saturating_sub(last_log) >= SWEEP_LOG_INTERVAL_MS {
                    last_log = now;
                    let encoders = self.readings_print();
                    debug!("Sweep speed {}: {}", speed, encoders);
                }
                if abort() {
                    break 'sweep;
                }
            }
        }

        self.group.stop(target)?;
        self.stop_all()
    }
}

impl Board for MotorBoardGroup {
    fn group(&self) -> &BoardGroup {
        &self.group
    }

    fn group_mut(&mut self) -> &mut BoardGroup {
        &mut self.group
    }

    fn command_name(&self, opcode: u8) -> Cow<'static, str> {
        if opcode == Command::MeasureSending as u8 {
            Cow::Borrowed("Encoder")
        } else {
            protocol::command_name(opcode)
        }
    }

    fn decode_specific(&mut self, frame: &CanFrame, ordinal: usize) -> bool {
        if frame.command_kind() != Some(Command::MeasureSending) {
            return false;
        }
        let now = self.group.now_ms();
        let Some(state) = self.motors.get_mut(ordinal) else {
            return false;
        };
        state.encoder = frame.u32_le(1);
        if let Ok(device) = self.group.device_mut(ordinal) {
            device.last_reading_at_ms = Some(now);
        }
        true
    }
}

impl Drop for MotorBoardGroup {
    fn drop(&mut self) {
        if self.group.is_empty() {
            return;
        }
        info!("{}: stopping all motors", self.group.name());
        if let Err(e) = self.stop_all() {
            warn!("{}: failed to stop motors: {}", self.group.name(), e);
        }
    }
}
