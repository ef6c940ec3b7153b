// CAN frame as carried on the board bus
//
// Only standard (11-bit) ids are used by the boards. Byte 0 of the data is
// always the opcode, the remaining 7 bytes are payload.

use std::borrow::Cow;
use std::fmt;

use crate::protocol::{command_name, Command};

/// Maximum data bytes in a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Maximum payload after the opcode byte
pub const MAX_PAYLOAD_LEN: usize = MAX_DATA_LEN - 1;

/// Highest standard CAN id
pub const MAX_STANDARD_ID: u16 = 0x7FF;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Payload of {len} bytes does not fit in a frame (max 7)")]
    PayloadTooLong { len: usize },

    #[error("Frame data of {len} bytes exceeds 8")]
    DataTooLong { len: usize },

    #[error("CAN id 0x{id:X} is not a standard id")]
    InvalidId { id: u32 },
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u16,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl CanFrame {
    /// Build a frame from raw data bytes (opcode included)
    pub fn new(id: u16, data: &[u8]) -> Result<Self, FrameError> {
        if id > MAX_STANDARD_ID {
            return Err(FrameError::InvalidId { id: id as u32 });
        }
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::DataTooLong { len: data.len() });
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// Build a command frame: opcode followed by at most 7 payload bytes
    pub fn command(id: u16, opcode: impl Into<u8>, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }
        let mut data = [0u8; MAX_DATA_LEN];
        data[0] = opcode.into();
        data[1..=payload.len()].copy_from_slice(payload);
        Self::new(id, &data[..=payload.len()])
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Opcode byte, 0 for an empty frame
    pub fn opcode(&self) -> u8 {
        self.data[0]
    }

    pub fn command_kind(&self) -> Option<Command> {
        if self.is_empty() {
            None
        } else {
            Command::from_byte(self.opcode())
        }
    }

    /// Data byte at `index`, zero past the frame length
    pub fn byte(&self, index: usize) -> u8 {
        if index < self.len as usize {
            self.data[index]
        } else {
            0
        }
    }

    /// Little-endian u16 starting at data byte `index`
    pub fn u16_le(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.byte(index), self.byte(index + 1)])
    }

    /// Little-endian u32 starting at data byte `index`
    pub fn u32_le(&self, index: usize) -> u32 {
        u32::from_le_bytes([
            self.byte(index),
            self.byte(index + 1),
            self.byte(index + 2),
            self.byte(index + 3),
        ])
    }

    /// The 7 payload bytes following the opcode, zero-padded
    pub fn payload7(&self) -> [u8; MAX_PAYLOAD_LEN] {
        let mut out = [0u8; MAX_PAYLOAD_LEN];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.byte(i + 1);
        }
        out
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame(0x{:03X} {:02X?})", self.id, self.data())
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.is_empty() {
            Cow::Borrowed("empty")
        } else {
            command_name(self.opcode())
        };
        write!(f, "0x{:03X} [{}] {:02X?}", self.id, name, self.data())
    }
}
