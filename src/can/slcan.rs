// SLCAN (Lawicel ASCII) transport over a serial CAN adapter
//
// Line format for standard frames: t<iii><l><dd..>\r
//   iii - 11-bit id in hex, l - data length, dd - data bytes in hex
// Adapter commands: C (close), S<n> (bitrate), O (open). The adapter answers
// \r on success and \x07 (BEL) on error.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use super::frame::{CanFrame, MAX_DATA_LEN};
use super::transport::{CanTransport, TransportError};

/// Serial line speed for USB adapters (ignored by most CDC devices)
pub const DEFAULT_SERIAL_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

const LINE_END: u8 = b'\r';
const BELL: u8 = 0x07;

/// Longest line we accept before giving up on a runaway buffer
const MAX_LINE_LEN: usize = 64;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Map a CAN bitrate to its SLCAN `S` setup code
pub fn bitrate_code(bitrate: u32) -> Option<char> {
    let code = match bitrate {
        10_000 => '0',
        20_000 => '1',
        50_000 => '2',
        100_000 => '3',
        125_000 => '4',
        250_000 => '5',
        500_000 => '6',
        800_000 => '7',
        1_000_000 => '8',
        _ => return None,
    };
    Some(code)
}

/// SLCAN adapter on a serial port
pub struct SlcanTransport {
    port: Box<dyn SerialPort>,
    rx: Vec<u8>,
}

impl SlcanTransport {
    /// Open the adapter and start the CAN channel at `bitrate`
    pub fn open(port_name: &str, bitrate: u32) -> Result<Self> {
        let code = bitrate_code(bitrate).ok_or_else(|| TransportError::Rejected {
            command: format!("bitrate {}", bitrate),
        })?;

        info!("Opening SLCAN adapter on {} at {} bit/s", port_name, bitrate);
        let port = serialport::new(port_name, DEFAULT_SERIAL_BAUDRATE)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        let mut transport = Self {
            port,
            rx: Vec::new(),
        };

        // Close first in case the channel was left open, the answer is irrelevant
        transport.write_line("C")?;
        transport.write_line(&format!("S{}", code))?;
        transport.write_line("O")?;
        Ok(transport)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("SLCAN command {:?}", line);
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(&[LINE_END])?;
        self.port.flush()?;
        Ok(())
    }

    /// Read whatever the adapter has buffered without blocking
    fn fill_rx(&mut self) -> Result<()> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(());
        }
        let mut chunk = vec![0u8; available];
        let read = self.port.read(&mut chunk)?;
        self.rx.extend_from_slice(&chunk[..read]);
        Ok(())
    }

    /// Pop one complete line (without the terminator) from the rx buffer
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.rx.iter().position(|&b| b == LINE_END || b == BELL)?;
        let line: Vec<u8> = self.rx.drain(..=end).collect();
        Some(line[..line.len() - 1].to_vec())
    }
}

impl CanTransport for SlcanTransport {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let line = encode_frame(frame);
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CanFrame>> {
        self.fill_rx()?;
        while let Some(line) = self.next_line() {
            if let Some(frame) = parse_line(&line)? {
                return Ok(Some(frame));
            }
        }
        if self.rx.len() > MAX_LINE_LEN {
            let line = String::from_utf8_lossy(&self.rx).into_owned();
            self.rx.clear();
            return Err(TransportError::Malformed {
                line,
                reason: "no line terminator".to_string(),
            });
        }
        Ok(None)
    }
}

/// Encode a standard frame as an SLCAN transmit line (terminator included)
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut line = format!("t{:03X}{:X}", frame.id(), frame.len());
    for byte in frame.data() {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push(LINE_END as char);
    line
}

/// Parse one adapter line. Acknowledgements and unknown line types yield `None`.
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let Some((&kind, rest)) = line.split_first() else {
        return Ok(None);
    };
    if kind != b't' {
        // 'z' transmit ack, 'T' extended frames (not used by the boards), status replies
        return Ok(None);
    }

    let malformed = |reason: &str| TransportError::Malformed {
        line: String::from_utf8_lossy(line).into_owned(),
        reason: reason.to_string(),
    };

    if rest.len() < 4 {
        return Err(malformed("too short"));
    }
    let id = parse_hex(&rest[..3]).ok_or_else(|| malformed("bad id"))? as u16;
    let len = parse_hex(&rest[3..4]).ok_or_else(|| malformed("bad length"))? as usize;
    if len > MAX_DATA_LEN {
        return Err(malformed("length over 8"));
    }
    let hex = &rest[4..];
    if hex.len() < len * 2 {
        return Err(malformed("missing data"));
    }

    let mut data = [0u8; MAX_DATA_LEN];
    for (i, byte) in data.iter_mut().take(len).enumerate() {
        *byte = parse_hex(&hex[i * 2..i * 2 + 2]).ok_or_else(|| malformed("bad data"))? as u8;
    }

    CanFrame::new(id, &data[..len])
        .map(Some)
        .map_err(|e| malformed(&e.to_string()))
}

fn parse_hex(digits: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_encode_frame() {
        let frame = CanFrame::command(0x230, Command::SpeedSet, &[0xB2]).unwrap();
        assert_eq!(encode_frame(&frame), "t230220B2\r");
    }

    #[test]
    fn test_encode_opcode_only() {
        let frame = CanFrame::command(0x110, Command::ReportAlive, &[]).unwrap();
        assert_eq!(encode_frame(&frame), "t1101FF\r");
    }

    #[test]
    fn test_parse_standard_frame() {
        let frame = parse_line(b"t2315137856341200").unwrap().unwrap();
        assert_eq!(frame.id(), 0x231);
        assert_eq!(frame.data(), &[0x13, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_parse_ignores_acks_and_empty_lines() {
        assert_eq!(parse_line(b"").unwrap(), None);
        assert_eq!(parse_line(b"z").unwrap(), None);
        assert_eq!(parse_line(b"T000001231FF").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_truncated_data() {
        assert!(matches!(
            parse_line(b"t2313FF"),
            Err(TransportError::Malformed { .. })
        ));
        assert!(matches!(
            parse_line(b"t23"),
            Err(TransportError::Malformed { .. })
        ));
        assert!(matches!(
            parse_line(b"t2319"),
            Err(TransportError::Malformed { .. })
        ));
    }

    #[test]
    fn test_bitrate_codes() {
        assert_eq!(bitrate_code(250_000), Some('5'));
        assert_eq!(bitrate_code(1_000_000), Some('8'));
        assert_eq!(bitrate_code(333_000), None);
    }
}
