// Board layer: device registry, liveness and the common protocol
//
// Provides:
// - BoardGroup: all boards of one hardware type and their devices
// - Board trait: inbound decoding, timed waits that service the bus, scanning
// - Motor and sensor board families

pub mod device;
pub mod dispatch;
pub mod group;
pub mod motor;
pub mod sensor;

use std::borrow::Cow;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::can::{CanFrame, FrameError, TransportError};
use crate::config::{PRE_SCAN_DELAY, SCAN_PAUSE, SLOW_SCAN_FACTOR};
use crate::protocol::{self, error_code, Command};

pub use device::{Device, MAX_NAME_LEN};
pub use dispatch::MessageAssembler;
pub use group::{BoardGroup, BoardKind};
pub use motor::{MotorBoardGroup, SharedMotorBoard};
pub use sensor::{outlier_filtered_mean, standard_deviation, SensorBoardGroup, Stats};

/// Scan mask selecting every device a scan can address
pub const SCAN_ALL: u16 = 0xFFFF;

/// Which devices of a group an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    One(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Device name {name:?} is longer than {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("{board}: all {capacity} device slots are taken")]
    RegistryFull { board: String, capacity: usize },

    #[error("{board}: no device with ordinal {ordinal}")]
    NoSuchDevice { board: String, ordinal: usize },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A board family: the shared group plus the decoding of its own opcodes
pub trait Board {
    fn group(&self) -> &BoardGroup;

    fn group_mut(&mut self) -> &mut BoardGroup;

    /// Interpret a frame the common decoder left alone. Returns false when
    /// the opcode means nothing to this family either.
    fn decode_specific(&mut self, frame: &CanFrame, ordinal: usize) -> bool;

    /// Display name for an opcode, overridable for family-specific meanings
    fn command_name(&self, opcode: u8) -> Cow<'static, str> {
        protocol::command_name(opcode)
    }

    /// Decode an inbound frame. Returns false when no device of this group
    /// sent it.
    fn decode(&mut self, frame: &CanFrame) -> bool {
        let Some(ordinal) = self.group().ordinal_addressed_to(frame.id()) else {
            return false;
        };
        if !self.group_mut().decode_common(frame, ordinal) && !self.decode_specific(frame, ordinal) {
            debug!(
                "{}: unhandled {}",
                self.group().name(),
                self.command_name(frame.opcode())
            );
            self.group()
                .report(frame, error_code::COMMAND_UNKNOWN, false);
        }
        true
    }

    /// Pull frames from the bus and decode those sent by this group's devices
    fn pump(&mut self) -> usize {
        let bus = Rc::clone(self.group().bus());
        let ids: Vec<u16> = self.group().devices().iter().map(Device::can_id_out).collect();
        let frames = {
            let mut bus = bus.borrow_mut();
            bus.poll();
            bus.take_matching(|id| ids.contains(&id))
        };
        for frame in &frames {
            self.decode(frame);
        }
        frames.len()
    }

    /// Wait while servicing inbound frames, so replies land during the wait
    fn wait(&mut self, duration: Duration) {
        let clock = Rc::clone(self.group().clock());
        if duration < Duration::from_millis(1) {
            clock.sleep(duration);
            self.pump();
            return;
        }
        let start = clock.now_ms();
        let span = duration.as_millis() as u64;
        loop {
            self.pump();
            if clock.now_ms().saturating_sub(start) >= span {
                break;
            }
            clock.sleep(Duration::from_millis(1));
        }
    }

    /// Ping every dead device whose bit is set in `mask` (bit n = ordinal n)
    fn scan(&mut self, mask: u16) -> Result<(), BoardError> {
        let pause = if self.group().is_slow_scan() {
            SCAN_PAUSE * SLOW_SCAN_FACTOR
        } else {
            SCAN_PAUSE
        };
        let len = self.group().len().min(u16::BITS as usize);
        for ordinal in 0..len {
            if mask & (1 << ordinal) == 0 || self.group().devices()[ordinal].is_alive() {
                continue;
            }
            self.wait(PRE_SCAN_DELAY);
            self.group_mut()
                .message_send(ordinal, Command::ReportAlive, &[])?;
            self.wait(pause);
        }
        Ok(())
    }

    /// Is the device (or any device, for `All`) alive? A dead device gets
    /// one rescan when `retry` is set.
    fn is_alive_optionally_rescan(&mut self, target: Target, retry: bool) -> bool {
        let ordinal = match target {
            Target::All => {
                let len = self.group().len();
                return (0..len).any(|o| self.is_alive_optionally_rescan(Target::One(o), retry));
            }
            Target::One(ordinal) => ordinal,
        };
        let Ok(device) = self.group().device(ordinal) else {
            return false;
        };
        if device.is_alive() {
            return true;
        }
        if !retry {
            return false;
        }
        if ordinal < u16::BITS as usize {
            if let Err(e) = self.scan(1 << ordinal) {
                warn!("Rescan failed: {}", e);
            }
        }
        let device = match self.group().device(ordinal) {
            Ok(device) => device,
            Err(_) => return false,
        };
        if device.is_alive() {
            true
        } else {
            warn!("{} dead", device.name());
            false
        }
    }

    /// True when an alive device follows a dead one in ordinal order
    fn gap_exists(&self) -> bool {
        let mut dead_seen = false;
        for device in self.group().devices() {
            if device.is_alive() {
                if dead_seen {
                    return true;
                }
            } else {
                dead_seen = true;
            }
        }
        false
    }

    /// Number of alive devices, checked one by one without rescanning
    fn count(&mut self) -> usize {
        let len = self.group().len();
        (0..len)
            .filter(|&o| self.is_alive_optionally_rescan(Target::One(o), false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::MockBus;
    use crate::can::Clock;

    /// Minimal family with no opcodes of its own
    struct PlainBoard {
        group: BoardGroup,
    }

    impl Board for PlainBoard {
        fn group(&self) -> &BoardGroup {
            &self.group
        }

        fn group_mut(&mut self) -> &mut BoardGroup {
            &mut self.group
        }

        fn decode_specific(&mut self, _frame: &CanFrame, _ordinal: usize) -> bool {
            false
        }
    }

    fn plain(mock: &MockBus, devices: u16) -> PlainBoard {
        let mut group = BoardGroup::new("plain", BoardKind::Sensor, 1, 8, &mock.bus);
        for i in 0..devices {
            group
                .add(&format!("Dev-{}", i), 0x300 + 2 * i, 0x301 + 2 * i)
                .unwrap();
        }
        PlainBoard { group }
    }

    /// Answer report-alive pings from the listed inbound ids
    fn answer_pings(mock: &MockBus, alive_ids: &'static [u16]) {
        mock.respond_with(move |frame| {
            if frame.opcode() == Command::ReportAlive as u8 && alive_ids.contains(&frame.id()) {
                vec![CanFrame::command(frame.id() + 1, Command::ReportAlive, &[]).unwrap()]
            } else {
                Vec::new()
            }
        });
    }

    fn set_pattern(board: &mut PlainBoard, pattern: &[bool]) {
        for (ordinal, &alive) in pattern.iter().enumerate() {
            board
                .group_mut()
                .set_alive(Target::One(ordinal), alive)
                .unwrap();
        }
    }

    #[test]
    fn test_gap_patterns() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 3);

        set_pattern(&mut board, &[true, false, true]);
        assert!(board.gap_exists());

        set_pattern(&mut board, &[true, true, false]);
        assert!(!board.gap_exists());

        set_pattern(&mut board, &[false, false, false]);
        assert!(!board.gap_exists());
    }

    #[test]
    fn test_scan_reply_sets_alive() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 3);
        answer_pings(&mock, &[0x300, 0x304]);

        board.scan(SCAN_ALL).unwrap();

        let alive: Vec<bool> = board.group().devices().iter().map(Device::is_alive).collect();
        assert_eq!(alive, vec![true, false, true]);
        assert!(board.gap_exists());
        assert_eq!(board.count(), 2);
    }

    #[test]
    fn test_scan_skips_alive_and_masked_devices() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 3);
        board.group_mut().set_alive(Target::One(0), true).unwrap();

        board.scan(0b011).unwrap();

        let pinged: Vec<u16> = mock.sent().iter().map(CanFrame::id).collect();
        assert_eq!(pinged, vec![0x302]);
    }

    #[test]
    fn test_slow_scan_waits_longer() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 1);
        board.scan(SCAN_ALL).unwrap();
        let fast = mock.clock.now_ms();

        let slow_mock = MockBus::new();
        let mut group = BoardGroup::new("plain", BoardKind::Sensor, 1, 8, &slow_mock.bus)
            .with_slow_scan(true);
        group.add("Dev-0", 0x300, 0x301).unwrap();
        let mut slow = PlainBoard { group };
        slow.scan(SCAN_ALL).unwrap();
        let slow_elapsed = slow_mock.clock.now_ms();

        assert_eq!(fast, 15);
        assert_eq!(slow_elapsed, 35);
    }

    #[test]
    fn test_rescan_revives_responsive_device() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 2);
        answer_pings(&mock, &[0x302]);

        assert!(!board.is_alive_optionally_rescan(Target::One(1), false));
        assert!(mock.sent().is_empty());

        assert!(board.is_alive_optionally_rescan(Target::One(1), true));
        assert!(board.group().device(1).unwrap().alive_once());
    }

    #[test]
    fn test_rescan_of_silent_device_fails() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 2);

        assert!(!board.is_alive_optionally_rescan(Target::One(0), true));
        assert_eq!(mock.sent_with(Command::ReportAlive as u8).len(), 1);
        assert!(!board.is_alive_optionally_rescan(Target::All, false));
    }

    #[test]
    fn test_any_alive_for_all_target() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 3);
        board.group_mut().set_alive(Target::One(2), true).unwrap();
        assert!(board.is_alive_optionally_rescan(Target::All, false));
    }

    #[test]
    fn test_unknown_opcode_reported_once() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 1);
        let frame = CanFrame::command(0x301, Command::SpeedSet, &[128]).unwrap();

        assert!(board.decode(&frame));
        let reports = mock.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_code, error_code::COMMAND_UNKNOWN);
        assert!(!reports[0].peripheral);
    }

    #[test]
    fn test_frames_of_other_groups_are_not_claimed() {
        let mock = MockBus::new();
        let mut board = plain(&mock, 1);
        let foreign = CanFrame::command(0x401, Command::ReportAlive, &[]).unwrap();
        // 0x300 is the device's inbound id; the host does not decode its own frames
        let echo = CanFrame::command(0x300, Command::ReportAlive, &[]).unwrap();
        assert!(!board.decode(&foreign));
        assert!(!board.decode(&echo));

        mock.inject(foreign);
        assert_eq!(board.pump(), 0);
        assert_eq!(mock.bus.borrow().backlog_len(), 1);
    }
}
