// Inbound opcodes every board family answers the same way

use tracing::{debug, info};

use super::group::BoardGroup;
use super::Target;
use crate::can::{CanFrame, MAX_PAYLOAD_LEN};
use crate::protocol::Command;

/// Number of message-sending segments in one device message
pub const MESSAGE_SEGMENTS: usize = 4;

const MESSAGE_LEN: usize = MESSAGE_SEGMENTS * MAX_PAYLOAD_LEN;

/// Reassembles the text a device sends in four 7-byte segments
#[derive(Debug, Clone)]
pub struct MessageAssembler {
    buffer: [u8; MESSAGE_LEN + 1],
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            buffer: [0; MESSAGE_LEN + 1],
        }
    }

    /// Copy one segment into place. The last segment terminates the buffer
    /// and yields the text; segments are not reordered.
    pub fn accept(&mut self, segment: usize, payload: &[u8; MAX_PAYLOAD_LEN]) -> Option<String> {
        if segment >= MESSAGE_SEGMENTS {
            return None;
        }
        let start = segment * MAX_PAYLOAD_LEN;
        self.buffer[start..start + MAX_PAYLOAD_LEN].copy_from_slice(payload);
        if segment == MESSAGE_SEGMENTS - 1 {
            self.buffer[MESSAGE_LEN] = 0;
            Some(self.text())
        } else {
            None
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Current contents up to the first NUL
    pub fn text(&self) -> String {
        let end = self.buffer.iter().position(|&b| b == 0).unwrap_or(MESSAGE_LEN);
        String::from_utf8_lossy(&self.buffer[..end]).into_owned()
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardGroup {
    /// Handle the opcodes shared by all boards. Returns false when the frame
    /// is left for the board family to interpret.
    pub fn decode_common(&mut self, frame: &CanFrame, ordinal: usize) -> bool {
        let now = self.now_ms();
        let Ok(device) = self.device_mut(ordinal) else {
            return false;
        };
        device.last_message_at_ms = Some(now);

        let Some(command) = frame.command_kind() else {
            return false;
        };
        match command {
            Command::DuplicateIdPing
            | Command::DuplicateIdEcho
            | Command::Notification
            | Command::CanTest => {}
            Command::Error => {
                self.report(frame, frame.byte(1), true);
            }
            Command::FirmwareSending => {
                let version = frame.u16_le(1);
                let name = match self.device_mut(ordinal) {
                    Ok(device) => {
                        device.firmware_version = Some(version);
                        device.name().to_string()
                    }
                    Err(_) => return false,
                };
                info!("{}: firmware version {}", name, version);
            }
            Command::FpsSending => {
                if let Ok(device) = self.device_mut(ordinal) {
                    device.set_fps(frame.u16_le(1));
                }
            }
            Command::MessageSending1
            | Command::MessageSending2
            | Command::MessageSending3
            | Command::MessageSending4 => {
                let Some(segment) = command.message_segment() else {
                    return false;
                };
                if let Some(text) = self.assembler.accept(segment, &frame.payload7()) {
                    if let Ok(device) = self.device(ordinal) {
                        info!("Message from {}: {}", device.name(), text);
                    }
                    self.last_device_message = Some(text);
                }
            }
            Command::ReportAlive => {
                if self.set_alive(Target::One(ordinal), true).is_err() {
                    return false;
                }
                debug!("{}: device {} alive", self.name(), ordinal);
            }
            _ => return false,
        }
        true
    }
}
