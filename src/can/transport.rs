// Collaborators the board layer depends on, and the shared bus that owns them
//
// Every board group is built from a `SharedBus`, which cannot exist without a
// transport, a clock and an error sink.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use super::frame::CanFrame;
use crate::protocol::command_name;

/// Frames kept for other consumers before the oldest are dropped
pub const BACKLOG_CAPACITY: usize = 256;

/// Error types for the transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed adapter line {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("Adapter rejected command {command:?}")]
    Rejected { command: String },
}

/// Raw frame transport (CAN adapter, virtual bus, ...)
pub trait CanTransport {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Next received frame, `None` when nothing is pending
    fn try_receive(&mut self) -> Result<Option<CanFrame>, TransportError>;
}

/// Monotonic time source and blocking delay
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Blocking wait; millisecond and microsecond waits both go through here
    fn sleep(&self, duration: Duration);
}

/// Sink for protocol errors and peripheral fault reports
pub trait ErrorSink {
    fn report(&self, frame: &CanFrame, error_code: u8, peripheral: bool, print_now: bool);
}

/// Wall clock backed by `Instant` and `thread::sleep`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Error sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, frame: &CanFrame, error_code: u8, peripheral: bool, print_now: bool) {
        let origin = if peripheral { "peripheral" } else { "host" };
        if print_now {
            error!("{} error 0x{:02X} on frame {}", origin, error_code, frame);
        } else {
            debug!("{} error 0x{:02X} on frame {}", origin, error_code, frame);
        }
    }
}

/// Transport that accepts everything and never receives (dry runs)
#[derive(Debug, Default)]
pub struct NullTransport;

impl CanTransport for NullTransport {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        debug!("dry run, not sent: {}", frame);
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CanFrame>, TransportError> {
        Ok(None)
    }
}

/// The bus shared by all board groups: transport, clock, error sink and the
/// inbound backlog of frames not yet claimed by a board group.
pub struct Bus {
    transport: Box<dyn CanTransport>,
    clock: Rc<dyn Clock>,
    errors: Rc<dyn ErrorSink>,
    backlog: VecDeque<CanFrame>,
}

pub type SharedBus = Rc<RefCell<Bus>>;

impl Bus {
    pub fn new(
        transport: impl CanTransport + 'static,
        clock: Rc<dyn Clock>,
        errors: Rc<dyn ErrorSink>,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            clock,
            errors,
            backlog: VecDeque::new(),
        }
    }

    pub fn shared(self) -> SharedBus {
        Rc::new(RefCell::new(self))
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    pub fn errors(&self) -> Rc<dyn ErrorSink> {
        Rc::clone(&self.errors)
    }

    pub fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        trace!(">> {}", frame);
        self.transport.send(frame)
    }

    /// Move everything the transport has received into the backlog
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.transport.try_receive() {
                Ok(Some(frame)) => {
                    trace!("<< {}", frame);
                    if self.backlog.len() == BACKLOG_CAPACITY {
                        if let Some(dropped) = self.backlog.pop_front() {
                            warn!("Inbound backlog full, dropping {}", dropped);
                        }
                    }
                    self.backlog.push_back(frame);
                    received += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    break;
                }
            }
        }
        received
    }

    /// Remove and return backlog frames whose id satisfies `claims`, keeping order
    pub fn take_matching(&mut self, mut claims: impl FnMut(u16) -> bool) -> Vec<CanFrame> {
        let mut taken = Vec::new();
        self.backlog.retain(|frame| {
            if claims(frame.id()) {
                taken.push(*frame);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Remove and return the whole backlog
    pub fn drain(&mut self) -> Vec<CanFrame> {
        self.backlog.drain(..).collect()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

/// Log line for a frame nobody claimed
pub fn log_stray(frame: &CanFrame) {
    if frame.is_empty() {
        debug!("Stray empty frame 0x{:03X}", frame.id());
    } else {
        debug!("Stray frame 0x{:03X}: {}", frame.id(), command_name(frame.opcode()));
    }
}
