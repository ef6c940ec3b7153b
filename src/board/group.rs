// All boards of one hardware type: device registry, aliveness bits and the
// generic request helpers every board understands.

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::device::{Device, MAX_NAME_LEN};
use super::dispatch::MessageAssembler;
use super::{BoardError, Target};
use crate::can::{CanFrame, Clock, ErrorSink, SharedBus};
use crate::protocol::{error_code, Command};

/// Which family a board group belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    Motor,
    Sensor,
}

pub struct BoardGroup {
    name: String,
    kind: BoardKind,
    capacity: usize,
    devices: Vec<Device>,
    slow_scan: bool,
    measuring_mode: u8,
    measuring_mode_limit: u8,
    pub(crate) assembler: MessageAssembler,
    pub(crate) last_device_message: Option<String>,
    bus: SharedBus,
    clock: Rc<dyn Clock>,
    errors: Rc<dyn ErrorSink>,
}

impl BoardGroup {
    /// Create an empty group for up to `max_boards` boards of `devices_per_board` devices
    pub fn new(
        name: &str,
        kind: BoardKind,
        max_boards: usize,
        devices_per_board: usize,
        bus: &SharedBus,
    ) -> Self {
        let (clock, errors) = {
            let bus = bus.borrow();
            (bus.clock(), bus.errors())
        };
        Self {
            name: name.to_string(),
            kind,
            capacity: max_boards * devices_per_board,
            devices: Vec::new(),
            slow_scan: false,
            measuring_mode: 0,
            measuring_mode_limit: 0,
            assembler: MessageAssembler::new(),
            last_device_message: None,
            bus: Rc::clone(bus),
            clock,
            errors,
        }
    }

    /// Boards that need three times the usual pause to answer a scan
    pub fn with_slow_scan(mut self, slow: bool) -> Self {
        self.set_slow_scan(slow);
        self
    }

    /// Highest measuring mode the boards support (0 = only the default)
    pub fn with_measuring_mode_limit(mut self, limit: u8) -> Self {
        self.set_measuring_mode_limit(limit);
        self
    }

    pub fn set_slow_scan(&mut self, slow: bool) {
        self.slow_scan = slow;
    }

    pub fn set_measuring_mode_limit(&mut self, limit: u8) {
        self.measuring_mode_limit = limit;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BoardKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn is_slow_scan(&self) -> bool {
        self.slow_scan
    }

    pub fn measuring_mode(&self) -> u8 {
        self.measuring_mode
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Text of the last 4-segment message a device sent
    pub fn last_device_message(&self) -> Option<&str> {
        self.last_device_message.as_deref()
    }

    pub fn device(&self, ordinal: usize) -> Result<&Device, BoardError> {
        self.devices.get(ordinal).ok_or_else(|| self.no_such_device(ordinal))
    }

    pub(crate) fn device_mut(&mut self, ordinal: usize) -> Result<&mut Device, BoardError> {
        if ordinal < self.devices.len() {
            Ok(&mut self.devices[ordinal])
        } else {
            Err(self.no_such_device(ordinal))
        }
    }

    fn no_such_device(&self, ordinal: usize) -> BoardError {
        let err = BoardError::NoSuchDevice {
            board: self.name.clone(),
            ordinal,
        };
        warn!("{}", err);
        err
    }

    pub(crate) fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Blocking delay without servicing inbound frames
    pub(crate) fn delay(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    pub(crate) fn report(&self, frame: &CanFrame, code: u8, peripheral: bool) {
        self.errors.report(frame, code, peripheral, true);
    }

    // === Registry ===

    /// Register a device. Ordinals are handed out in call order, starting at 0.
    pub fn add(&mut self, name: &str, can_in: u16, can_out: u16) -> Result<usize, BoardError> {
        if name.len() > MAX_NAME_LEN {
            warn!("Name too long: {}", name);
            return Err(BoardError::NameTooLong {
                name: name.to_string(),
                max: MAX_NAME_LEN,
            });
        }
        if self.devices.len() >= self.capacity {
            warn!("{}: no room for {}", self.name, name);
            return Err(BoardError::RegistryFull {
                board: self.name.clone(),
                capacity: self.capacity,
            });
        }
        let ordinal = self.devices.len();
        self.devices.push(Device::new(name, ordinal, can_in, can_out));
        debug!("{}: added {} as {} (in 0x{:03X}, out 0x{:03X})", self.name, name, ordinal, can_in, can_out);
        Ok(ordinal)
    }

    /// Exchange the CAN ids of two devices, leaving names and readings in place.
    ///
    /// `add` assigns ordinals in registration order; swapping afterwards maps
    /// the wired order onto the order the robot code expects.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), BoardError> {
        self.device(a)?;
        self.device(b)?;
        if a == b {
            return Ok(());
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.devices.split_at_mut(high);
        head[low].swap_ids(&mut tail[0]);
        Ok(())
    }

    /// First device whose in or out id equals `frame_id`
    pub fn device_ordinal_for(&self, frame_id: u16) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| d.is_addressed_to(frame_id) || d.is_originated_by(frame_id))
    }

    /// Device an inbound frame with `frame_id` belongs to
    pub fn ordinal_addressed_to(&self, frame_id: u16) -> Option<usize> {
        self.devices.iter().position(|d| d.is_addressed_to(frame_id))
    }

    pub(crate) fn targets(&self, target: Target) -> Result<Vec<usize>, BoardError> {
        match target {
            Target::All => Ok((0..self.devices.len()).collect()),
            Target::One(ordinal) => {
                self.device(ordinal)?;
                Ok(vec![ordinal])
            }
        }
    }

    // === Aliveness ===

    /// Alive also latches the sticky alive-once flag; dead clears only alive
    pub fn set_alive(&mut self, target: Target, alive: bool) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            self.devices[ordinal].set_alive(alive);
        }
        Ok(())
    }

    pub fn alive_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_alive()).count()
    }

    fn is_alive(&self, ordinal: usize) -> bool {
        self.devices.get(ordinal).is_some_and(Device::is_alive)
    }

    // === Outbound ===

    /// Send `opcode` + `payload` to a device's inbound id
    pub fn message_send(
        &mut self,
        ordinal: usize,
        opcode: Command,
        payload: &[u8],
    ) -> Result<(), BoardError> {
        let id = self.device(ordinal)?.can_id_in();
        let frame = match CanFrame::command(id, opcode, payload) {
            Ok(frame) => frame,
            Err(e) => {
                if let Ok(context) = CanFrame::command(id, opcode, &[]) {
                    self.report(&context, error_code::PAYLOAD_TOO_LONG, false);
                }
                return Err(e.into());
            }
        };
        if let Err(e) = self.bus.borrow_mut().send(&frame) {
            self.report(&frame, error_code::SEND_FAILED, false);
            return Err(e.into());
        }
        Ok(())
    }

    /// Ask alive devices for their firmware version; answers are logged on arrival
    pub fn firmware_request(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.message_send(ordinal, Command::FirmwareRequest, &[])?;
            }
        }
        Ok(())
    }

    /// Ask alive devices for their FPS, forgetting the previous answer
    pub fn fps_request(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.message_send(ordinal, Command::FpsRequest, &[])?;
                self.devices[ordinal].fps_last = None;
            }
        }
        Ok(())
    }

    /// Log the last FPS of every alive device
    pub fn fps_display(&self) -> Vec<(String, Option<u16>)> {
        let mut listing = Vec::new();
        for device in self.devices.iter().filter(|d| d.is_alive()) {
            match device.fps_last() {
                Some(fps) => info!("{}: {} FPS", device.name(), fps),
                None => info!("{}: no response", device.name()),
            }
            listing.push((device.name().to_string(), device.fps_last()));
        }
        listing
    }

    /// Give a device a new CAN id slot
    pub fn id_change(&mut self, new_id: u8, ordinal: usize) -> Result<(), BoardError> {
        self.message_send(ordinal, Command::IdChangeRequest, &[new_id])
    }

    pub fn info(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.message_send(ordinal, Command::InfoRequest, &[])?;
                self.delay(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    /// Production self-test of the board oscillator
    pub fn oscillator_test(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                info!("Test {}", self.devices[ordinal].name());
                self.message_send(ordinal, Command::OscillatorTest, &[])?;
            }
        }
        Ok(())
    }

    /// Enable or disable plug and play
    pub fn pnp_set(&mut self, enable: bool, target: Target) -> Result<(), BoardError> {
        let opcode = if enable {
            Command::PnpEnable
        } else {
            Command::PnpDisable
        };
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.delay(Duration::from_millis(1));
                self.message_send(ordinal, opcode, &[enable as u8])?;
                info!(
                    "{} PnP {}",
                    self.devices[ordinal].name(),
                    if enable { "on" } else { "off" }
                );
            }
        }
        Ok(())
    }

    /// Reset devices, alive or not
    pub fn reset(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            self.message_send(ordinal, Command::Reset, &[])?;
        }
        Ok(())
    }

    /// Start periodic measurement frames.
    ///
    /// `mode` selects the measuring variant (capped by the group's limit);
    /// `refresh_ms` overrides the device's default period.
    pub fn start(
        &mut self,
        target: Target,
        mode: u8,
        refresh_ms: Option<u16>,
    ) -> Result<(), BoardError> {
        let opcode = match mode.min(self.measuring_mode_limit) {
            0 => Command::MeasureContinuous,
            1 => Command::MeasureContinuousVersion2,
            _ => Command::MeasureContinuousVersion3,
        };
        let refresh = refresh_ms.filter(|&ms| ms != 0).map(u16::to_le_bytes);
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.measuring_mode = mode;
                match refresh {
                    Some(bytes) => self.message_send(ordinal, opcode, &bytes)?,
                    None => self.message_send(ordinal, opcode, &[])?,
                }
                // Several devices of one kind miss the start without a gap
                self.delay(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    /// Stop periodic measurement frames
    pub fn stop(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.targets(target)? {
            if self.is_alive(ordinal) {
                self.message_send(ordinal, Command::MeasureStop, &[])?;
                self.devices[ordinal].last_reading_at_ms = None;
                self.delay(Duration::from_millis(1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::MockBus;

    fn group(mock: &MockBus, capacity: usize) -> BoardGroup {
        BoardGroup::new("mot4x3.6", BoardKind::Motor, 1, capacity, &mock.bus)
    }

    #[test]
    fn test_name_length_limit() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        assert_eq!(g.add("123456789", 0x230, 0x231).unwrap(), 0);
        assert!(matches!(
            g.add("1234567890", 0x232, 0x233),
            Err(BoardError::NameTooLong { .. })
        ));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_ordinals_follow_call_order() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        for i in 0..4u16 {
            assert_eq!(g.add(&format!("Mot-{}", i), 0x230 + 2 * i, 0x231 + 2 * i).unwrap(), i as usize);
        }
        let ordinals: Vec<usize> = g.devices().iter().map(Device::ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_registry_full() {
        let mock = MockBus::new();
        let mut g = group(&mock, 1);
        g.add("A", 0x100, 0x101).unwrap();
        assert!(matches!(
            g.add("B", 0x102, 0x103),
            Err(BoardError::RegistryFull { capacity: 1, .. })
        ));
    }

    #[test]
    fn test_swap_exchanges_only_ids() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("Left", 0x230, 0x231).unwrap();
        g.add("Right", 0x232, 0x233).unwrap();
        g.set_alive(Target::One(0), true).unwrap();

        g.swap(0, 1).unwrap();

        let left = g.device(0).unwrap();
        assert_eq!(left.name(), "Left");
        assert_eq!((left.can_id_in(), left.can_id_out()), (0x232, 0x233));
        assert!(left.is_alive());

        let right = g.device(1).unwrap();
        assert_eq!(right.name(), "Right");
        assert_eq!((right.can_id_in(), right.can_id_out()), (0x230, 0x231));
        assert!(!right.is_alive());
    }

    #[test]
    fn test_swap_out_of_range() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("Left", 0x230, 0x231).unwrap();
        assert!(matches!(
            g.swap(0, 5),
            Err(BoardError::NoSuchDevice { ordinal: 5, .. })
        ));
        assert_eq!(g.device(0).unwrap().can_id_in(), 0x230);
    }

    #[test]
    fn test_device_ordinal_for_matches_either_id() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.add("B", 0x232, 0x233).unwrap();
        assert_eq!(g.device_ordinal_for(0x232), Some(1));
        assert_eq!(g.device_ordinal_for(0x233), Some(1));
        assert_eq!(g.ordinal_addressed_to(0x232), None);
        assert_eq!(g.device_ordinal_for(0x300), None);
    }

    #[test]
    fn test_alive_once_survives_death() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.add("B", 0x232, 0x233).unwrap();

        g.set_alive(Target::All, true).unwrap();
        g.set_alive(Target::One(1), false).unwrap();

        assert_eq!(g.alive_count(), 1);
        assert!(g.device(1).unwrap().alive_once());
        assert!(!g.device(1).unwrap().is_alive());
    }

    #[test]
    fn test_requests_skip_dead_devices() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.add("B", 0x232, 0x233).unwrap();
        g.set_alive(Target::One(1), true).unwrap();

        g.firmware_request(Target::All).unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 0x232);
        assert_eq!(sent[0].data(), &[Command::FirmwareRequest as u8]);
    }

    #[test]
    fn test_reset_reaches_dead_devices() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.reset(Target::All).unwrap();
        assert_eq!(mock.sent_with(Command::Reset as u8).len(), 1);
    }

    #[test]
    fn test_id_change_payload() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.id_change(3, 0).unwrap();
        assert_eq!(mock.sent()[0].data(), &[0x40, 3]);
    }

    #[test]
    fn test_start_with_refresh_and_mode_limit() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4).with_measuring_mode_limit(1);
        g.add("A", 0x230, 0x231).unwrap();
        g.set_alive(Target::All, true).unwrap();

        g.start(Target::One(0), 0, Some(500)).unwrap();
        g.start(Target::One(0), 2, None).unwrap();

        let sent = mock.sent();
        assert_eq!(sent[0].data(), &[0x10, 0xF4, 0x01]);
        // Mode 2 is capped at the limit of 1
        assert_eq!(sent[1].data(), &[0x17]);
    }

    #[test]
    fn test_stop_forgets_last_reading() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.set_alive(Target::All, true).unwrap();
        g.device_mut(0).unwrap().last_reading_at_ms = Some(5);

        g.stop(Target::All).unwrap();
        assert_eq!(g.device(0).unwrap().last_reading_at_ms(), None);
        assert_eq!(mock.sent_with(Command::MeasureStop as u8).len(), 1);
    }

    #[test]
    fn test_fps_request_clears_previous_answer() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();
        g.set_alive(Target::All, true).unwrap();
        g.device_mut(0).unwrap().set_fps(50);

        g.fps_request(Target::All).unwrap();
        assert_eq!(g.device(0).unwrap().fps_last(), None);
        assert_eq!(g.fps_display(), vec![("A".to_string(), None)]);
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        assert!(matches!(
            g.info(Target::One(0)),
            Err(BoardError::NoSuchDevice { ordinal: 0, .. })
        ));
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn test_name_limit_counts_bytes() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        // Nine characters, ten bytes
        assert!(matches!(
            g.add("Motor-Ä12", 0x230, 0x231),
            Err(BoardError::NameTooLong { max: 9, .. })
        ));
        assert_eq!(g.add("Motor-Ä1", 0x230, 0x231).unwrap(), 0);
    }

    #[test]
    fn test_oversized_payload_is_reported() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();

        let result = g.message_send(0, Command::SpeedSet, &[0; 8]);
        assert!(matches!(
            result,
            Err(BoardError::Frame(crate::can::FrameError::PayloadTooLong { len: 8 }))
        ));
        assert!(mock.sent().is_empty());

        let reports = mock.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_code, error_code::PAYLOAD_TOO_LONG);
        assert!(!reports[0].peripheral);
        assert_eq!(reports[0].frame.id(), 0x230);
        assert_eq!(reports[0].frame.opcode(), Command::SpeedSet as u8);
    }

    #[test]
    fn test_send_failure_is_reported() {
        let mock = MockBus::new();
        let mut g = group(&mock, 4);
        g.add("A", 0x230, 0x231).unwrap();

        mock.fail_sends(1);
        let result = g.message_send(0, Command::IdChangeRequest, &[3]);
        assert!(matches!(result, Err(BoardError::Transport(_))));

        let reports = mock.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_code, error_code::SEND_FAILED);
        assert!(!reports[0].peripheral);
        assert_eq!(reports[0].frame.byte(1), 3);

        g.message_send(0, Command::IdChangeRequest, &[3]).unwrap();
        assert_eq!(mock.sent().len(), 1);
    }
}
