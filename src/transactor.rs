//! The debug-port transactor boundary.
//!
//! The engine never touches pins itself. Every pin-level or register-level
//! operation is described as a `Request` and handed to a `Transactor`, which
//! performs it and reports an `Outcome`. Only one request is ever in flight.

use num_enum::{FromPrimitive, IntoPrimitive};
use crate::config::{Protocol, WireConfig};

/// Acknowledgement returned by the target for a register transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Ack {
    Ok                  = 0b001,
    Wait                = 0b010,
    Fault               = 0b100,
    #[num_enum(default)]
    NoAck               = 0b111,
}

/// Register space selected by a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Port {
    DP,
    AP,
}

/// Direction of a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// One DP or AP register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub port: Port,
    pub direction: Direction,
    /// Register address bits A[3:2].
    pub register: u8,
    /// Data to write; ignored for reads.
    pub data: u32,
}

impl Transaction {
    pub fn read(port: Port, register: u8) -> Self {
        Transaction { port, direction: Direction::Read, register, data: 0 }
    }

    pub fn write(port: Port, register: u8, data: u32) -> Self {
        Transaction { port, direction: Direction::Write, register, data }
    }
}

/// Operations the engine may ask the transactor to perform.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Run the target reset sequence.
    Reset,
    /// Drive pins selected by `select` to `output`, wait `wait_us`, then
    /// report the pin input levels in the low byte of the outcome data.
    Pins { output: u8, select: u8, wait_us: u32 },
    /// Perform a register transaction.
    Transact(Transaction),
    /// Switch the physical port to a wire protocol.
    SetProtocol(Protocol),
    /// Program the clock divider.
    SetClock { divisor: u16 },
    /// Apply SWD line configuration and idle cycles.
    SetConfig(WireConfig),
    /// Wait for a number of microseconds.
    Wait { us: u32 },
    /// Clear any sticky error state after a protocol error.
    ClearError,
    /// Clock out one bit on SWDIO/TMS.
    SwjBit(bool),
    /// Clock one JTAG bit; TDO is returned in bit 0 of the outcome data.
    JtagBit { tms: bool, tdi: bool },
    /// Clock one SWD sequence bit, driving SWDIO if `output` is Some,
    /// otherwise sampling SWDIO into bit 0 of the outcome data.
    SwdBit { output: Option<bool> },
}

/// Result of one request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub ack: Ack,
    pub data: u32,
    /// Set when the transaction failed its parity check or framing.
    pub protocol_error: bool,
}

impl Outcome {
    pub fn ok(data: u32) -> Self {
        Outcome { ack: Ack::Ok, data, protocol_error: false }
    }

    pub fn ack(ack: Ack) -> Self {
        Outcome { ack, data: 0, protocol_error: false }
    }

    /// True if the ack was OK and no protocol error occurred.
    pub fn is_ok(&self) -> bool {
        self.ack == Ack::Ok && !self.protocol_error
    }

    /// Low bit of the returned data, for single-bit shift requests.
    pub fn bit(&self) -> bool {
        self.data & 1 == 1
    }
}

/// Something which can carry out debug-port requests.
///
/// `execute` blocks until the request has completed.
pub trait Transactor {
    fn execute(&mut self, request: Request) -> Outcome;
}

impl<T: Transactor + ?Sized> Transactor for &mut T {
    fn execute(&mut self, request: Request) -> Outcome {
        (**self).execute(request)
    }
}

/// A transactor driven by a go/done handshake.
///
/// `go` starts a request and `done` returns its outcome once finished.
pub trait Handshake {
    fn go(&mut self, request: Request);
    fn done(&mut self) -> Option<Outcome>;
}

/// Adapts a `Handshake` transactor into a blocking `Transactor` by polling.
///
/// There is no timeout: a handshake which never completes stalls the caller.
pub struct Polled<H: Handshake> {
    inner: H,
}

impl<H: Handshake> Polled<H> {
    pub fn new(inner: H) -> Self {
        Polled { inner }
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: Handshake> Transactor for Polled<H> {
    fn execute(&mut self, request: Request) -> Outcome {
        self.inner.go(request);
        loop {
            if let Some(outcome) = self.inner.done() {
                return outcome;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
struct Countdown {
    polls: usize,
    pending: Option<Request>,
}

#[cfg(test)]
impl Handshake for Countdown {
    fn go(&mut self, request: Request) {
        self.pending = Some(request);
    }

    fn done(&mut self) -> Option<Outcome> {
        if self.polls > 0 {
            self.polls -= 1;
            return None;
        }
        match self.pending.take() {
            Some(Request::Pins { output, .. }) => Some(Outcome::ok(output as u32)),
            Some(_) => Some(Outcome::ok(0)),
            None => None,
        }
    }
}

#[test]
fn test_ack_codes() {
    assert_eq!(Ack::from(0b001), Ack::Ok);
    assert_eq!(Ack::from(0b010), Ack::Wait);
    assert_eq!(Ack::from(0b100), Ack::Fault);
    assert_eq!(Ack::from(0b000), Ack::NoAck);
    assert_eq!(u8::from(Ack::NoAck), 0b111);
}

#[test]
fn test_outcome() {
    assert!(Outcome::ok(1).is_ok());
    assert!(Outcome::ok(1).bit());
    assert!(!Outcome::ack(Ack::Wait).is_ok());
    let perr = Outcome { protocol_error: true, ..Outcome::ok(0) };
    assert!(!perr.is_ok());
}

#[test]
fn test_polled() {
    let mut polled = Polled::new(Countdown { polls: 5, pending: None });
    let outcome = polled.execute(Request::Pins { output: 0x81, select: 0xFF, wait_us: 0 });
    assert_eq!(outcome, Outcome::ok(0x81));
    assert_eq!(polled.into_inner().polls, 0);
}
