// CAN layer for the board bus
//
// Provides:
// - Frame type with the opcode + 7 byte payload layout
// - Collaborator traits (transport, clock, error sink) and the shared bus
// - SLCAN serial adapter transport

pub mod frame;
pub mod slcan;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use frame::{CanFrame, FrameError, MAX_PAYLOAD_LEN};
pub use slcan::SlcanTransport;
pub use transport::{
    log_stray, Bus, CanTransport, Clock, ErrorSink, NullTransport, SharedBus, SystemClock,
    TracingErrorSink, TransportError, BACKLOG_CAPACITY,
};
