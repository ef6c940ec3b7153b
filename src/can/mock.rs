// Test doubles: virtual-time clock, scripted transport, recording error sink

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use super::frame::CanFrame;
use super::transport::{Bus, CanTransport, Clock, ErrorSink, SharedBus, TransportError};

/// Clock whose time only moves when something sleeps
#[derive(Debug, Default)]
pub struct MockClock {
    now_us: Cell<u64>,
}

impl MockClock {
    pub fn advance(&self, duration: Duration) {
        self.now_us.set(self.now_us.get() + duration.as_micros() as u64);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_us.get() / 1000
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame>>;

/// Transport that records sent frames and answers through a responder closure
pub struct MockTransport {
    sent: Rc<RefCell<Vec<CanFrame>>>,
    inbound: Rc<RefCell<VecDeque<CanFrame>>>,
    responder: Rc<RefCell<Option<Responder>>>,
    failing_sends: Rc<Cell<usize>>,
}

impl CanTransport for MockTransport {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        let failing = self.failing_sends.get();
        if failing > 0 {
            self.failing_sends.set(failing - 1);
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "adapter unplugged",
            )));
        }
        self.sent.borrow_mut().push(*frame);
        if let Some(responder) = self.responder.borrow_mut().as_mut() {
            let replies = responder(frame);
            self.inbound.borrow_mut().extend(replies);
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CanFrame>, TransportError> {
        Ok(self.inbound.borrow_mut().pop_front())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub frame: CanFrame,
    pub error_code: u8,
    pub peripheral: bool,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: RefCell<Vec<Report>>,
}

impl ErrorSink for RecordingSink {
    fn report(&self, frame: &CanFrame, error_code: u8, peripheral: bool, _print_now: bool) {
        self.reports.borrow_mut().push(Report {
            frame: *frame,
            error_code,
            peripheral,
        });
    }
}

/// A bus wired to mocks, with handles to inspect and script them
pub struct MockBus {
    pub bus: SharedBus,
    pub clock: Rc<MockClock>,
    pub sink: Rc<RecordingSink>,
    sent: Rc<RefCell<Vec<CanFrame>>>,
    inbound: Rc<RefCell<VecDeque<CanFrame>>>,
    responder: Rc<RefCell<Option<Responder>>>,
    failing_sends: Rc<Cell<usize>>,
}

impl MockBus {
    pub fn new() -> Self {
        let clock = Rc::new(MockClock::default());
        let sink = Rc::new(RecordingSink::default());
        let sent = Rc::new(RefCell::new(Vec::new()));
        let inbound = Rc::new(RefCell::new(VecDeque::new()));
        let responder: Rc<RefCell<Option<Responder>>> = Rc::new(RefCell::new(None));
        let failing_sends = Rc::new(Cell::new(0));
        let transport = MockTransport {
            sent: Rc::clone(&sent),
            inbound: Rc::clone(&inbound),
            responder: Rc::clone(&responder),
            failing_sends: Rc::clone(&failing_sends),
        };
        let bus = Bus::new(
            transport,
            Rc::clone(&clock) as Rc<dyn Clock>,
            Rc::clone(&sink) as Rc<dyn ErrorSink>,
        )
        .shared();
        Self {
            bus,
            clock,
            sink,
            sent,
            inbound,
            responder,
            failing_sends,
        }
    }

    /// Make the next `count` sends fail without reaching the bus
    pub fn fail_sends(&self, count: usize) {
        self.failing_sends.set(count);
    }

    /// Answer every sent frame with the frames `responder` returns
    pub fn respond_with(&self, responder: impl FnMut(&CanFrame) -> Vec<CanFrame> + 'static) {
        *self.responder.borrow_mut() = Some(Box::new(responder));
    }

    /// Queue a frame as if it had arrived from the bus
    pub fn inject(&self, frame: CanFrame) {
        self.inbound.borrow_mut().push_back(frame);
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.sent.borrow().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.borrow_mut().clear();
    }

    /// Sent frames carrying `opcode`
    pub fn sent_with(&self, opcode: u8) -> Vec<CanFrame> {
        self.sent
            .borrow()
            .iter()
            .filter(|f| !f.is_empty() && f.opcode() == opcode)
            .copied()
            .collect()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.sink.reports.borrow().clone()
    }
}
