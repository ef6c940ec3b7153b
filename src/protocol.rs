// Single-byte command protocol shared by every board family
//
// Frame layout: [opcode, payload0 .. payload6], at most 8 bytes on the wire.

use std::borrow::Cow;

/// Command opcodes understood by the boards
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    MeasureContinuous = 0x10,
    MeasureOnce = 0x11,
    MeasureStop = 0x12,
    MeasureSending = 0x13,
    MeasureContinuousRequestNotification = 0x14,
    MeasureContinuousReturnCalculated = 0x15,
    MeasureCalculatedSending = 0x16,
    MeasureContinuousVersion2 = 0x17,
    MeasureContinuousVersion3 = 0x18,
    FirmwareRequest = 0x19,
    FirmwareSending = 0x1A,
    Reset = 0x1B,
    MessageSending1 = 0x1C,
    MessageSending2 = 0x1D,
    MessageSending3 = 0x1E,
    MessageSending4 = 0x1F,
    SpeedSet = 0x20,
    SpeedSetRequestNotification = 0x21,
    DuplicateIdPing = 0x22,
    DuplicateIdEcho = 0x23,
    InfoRequest = 0x24,
    InfoSending1 = 0x25,
    InfoSending2 = 0x26,
    InfoSending3 = 0x27,
    PnpEnable = 0x28,
    PnpDisable = 0x29,
    FpsRequest = 0x30,
    FpsSending = 0x31,
    PnpRequest = 0x32,
    PnpSending = 0x33,
    IdChangeRequest = 0x40,
    Notification = 0x41,
    OscillatorTest = 0x43,
    Error = 0xEE,
    CanTest = 0xFE,
    ReportAlive = 0xFF,
}

/// Opcode -> short display name, fixed at compile time
const COMMAND_NAMES: &[(Command, &str)] = &[
    (Command::MeasureContinuous, "Measure cont"),
    (Command::MeasureOnce, "Measure once"),
    (Command::MeasureStop, "Measure stop"),
    (Command::MeasureSending, "Measure send"),
    (Command::MeasureContinuousRequestNotification, "Meas req not"),
    (Command::MeasureContinuousReturnCalculated, "Meas con cal"),
    (Command::MeasureCalculatedSending, "Meas cal sen"),
    (Command::MeasureContinuousVersion2, "Measure co 2"),
    (Command::MeasureContinuousVersion3, "Measure co 3"),
    (Command::FirmwareRequest, "Firmware req"),
    (Command::FirmwareSending, "Firmware sen"),
    (Command::Reset, "Reset"),
    (Command::MessageSending1, "Messa send 1"),
    (Command::MessageSending2, "Messa send 2"),
    (Command::MessageSending3, "Messa send 3"),
    (Command::MessageSending4, "Messa send 4"),
    (Command::SpeedSet, "Speed set"),
    (Command::SpeedSetRequestNotification, "Speed set re"),
    (Command::DuplicateIdPing, "Dupl id ping"),
    (Command::DuplicateIdEcho, "Dupl id echo"),
    (Command::InfoRequest, "Info request"),
    (Command::InfoSending1, "Info sendi 1"),
    (Command::InfoSending2, "Info sendi 2"),
    (Command::InfoSending3, "Info sendi 3"),
    (Command::PnpEnable, "PnP enable"),
    (Command::PnpDisable, "PnP disable"),
    (Command::FpsRequest, "FPS request"),
    (Command::FpsSending, "FPS sending"),
    (Command::PnpRequest, "PnP request"),
    (Command::PnpSending, "PnP sending"),
    (Command::IdChangeRequest, "Id change re"),
    (Command::Notification, "Notification"),
    (Command::OscillatorTest, "Oscilla test"),
    (Command::Error, "Error"),
    (Command::CanTest, "CAN test"),
    (Command::ReportAlive, "Report alive"),
];

impl Command {
    /// Look up the command for a raw opcode byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        COMMAND_NAMES
            .iter()
            .map(|&(command, _)| command)
            .find(|&command| command as u8 == byte)
    }

    /// Short human-readable name
    pub fn name(self) -> &'static str {
        COMMAND_NAMES
            .iter()
            .find(|&&(command, _)| command == self)
            .map(|&(_, name)| name)
            .unwrap_or("?")
    }

    /// Segment index (0..4) for the four message-sending opcodes
    pub fn message_segment(self) -> Option<usize> {
        match self {
            Command::MessageSending1 => Some(0),
            Command::MessageSending2 => Some(1),
            Command::MessageSending3 => Some(2),
            Command::MessageSending4 => Some(3),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

/// Name of any opcode byte. Unknown bytes get a placeholder instead of an error.
pub fn command_name(byte: u8) -> Cow<'static, str> {
    match Command::from_byte(byte) {
        Some(command) => Cow::Borrowed(command.name()),
        None => Cow::Owned(format!("no common command 0x{:02X}", byte)),
    }
}

/// Host-side error codes passed to the error sink
pub mod error_code {
    /// Opcode not understood by the common dispatcher nor by the board type
    pub const COMMAND_UNKNOWN: u8 = 0x01;
    /// Outbound payload does not fit in a CAN frame
    pub const PAYLOAD_TOO_LONG: u8 = 0x02;
    /// Transport refused the frame
    pub const SEND_FAILED: u8 = 0x03;
}
