//! In-memory simulated debug target.
//!
//! `SimTarget` answers transactor requests without any hardware: a small
//! DP/AP register file behind SWD-style transactions, JTAG with TDO looped
//! back to TDI, and a queue of scripted acks for exercising error paths.
//! Every request is recorded so callers can inspect what the engine did.

use std::collections::{HashMap, VecDeque};

use crate::config::{Protocol, WireConfig, DEFAULT_CLOCK_DIVISOR};
use crate::transactor::{Ack, Direction, Outcome, Port, Request, Transaction, Transactor};

/// DPIDR of an ARM ADIv5 SW-DP.
pub const SIM_DPIDR: u32 = 0x2BA0_1477;

/// IDR of a MEM-AP at APSEL 0.
pub const SIM_AP_IDR: u32 = 0x2477_0011;

const DP_DPIDR: u8 = 0x0;
const DP_CTRL_STAT: u8 = 0x1;
const DP_SELECT: u8 = 0x2;
const DP_RDBUFF: u8 = 0x3;

/// CSYSPWRUPREQ and CDBGPWRUPREQ.
const CTRL_PWRUPREQ: u32 = (1 << 30) | (1 << 28);

#[derive(Clone, Debug)]
enum Scripted {
    Ack(Ack),
    ProtocolError,
}

#[derive(Clone, Debug)]
pub struct SimTarget {
    /// Every request received, in order.
    pub history: Vec<Request>,
    pub protocol: Protocol,
    pub divisor: u16,
    pub wire: WireConfig,
    pub resets: usize,
    pub waited_us: u64,
    /// Last value written to DP ABORT.
    pub abort: Option<u32>,
    pub pins: u8,
    /// Bits clocked out by SWJ sequences.
    pub swj_bits: Vec<bool>,
    /// Bits driven by SWD sequence outputs.
    pub swd_bits: Vec<bool>,
    /// Levels returned for SWD sequence inputs; reads high once empty.
    pub swd_input: VecDeque<bool>,
    ctrl_stat: u32,
    select: u32,
    rdbuff: u32,
    ap: HashMap<(u8, u8, u8), u32>,
    script: VecDeque<Scripted>,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTarget {
    pub fn new() -> Self {
        let mut ap = HashMap::new();
        ap.insert((0, 0xF, 0x3), SIM_AP_IDR);
        SimTarget {
            history: Vec::new(),
            protocol: Protocol::None,
            divisor: DEFAULT_CLOCK_DIVISOR,
            wire: WireConfig::default(),
            resets: 0,
            waited_us: 0,
            abort: None,
            pins: 0,
            swj_bits: Vec::new(),
            swd_bits: Vec::new(),
            swd_input: VecDeque::new(),
            ctrl_stat: 0,
            select: 0,
            rdbuff: 0,
            ap,
            script: VecDeque::new(),
        }
    }

    /// Answer the next register transaction with `ack` instead of performing it.
    /// Scripting `Ack::Ok` lets that transaction run normally.
    pub fn script_ack(&mut self, ack: Ack) {
        self.script.push_back(Scripted::Ack(ack));
    }

    /// Fail the next register transaction with a protocol error.
    pub fn script_protocol_error(&mut self) {
        self.script.push_back(Scripted::ProtocolError);
    }

    /// Set an AP register, addressed by APSEL, bank and register.
    pub fn set_ap(&mut self, apsel: u8, bank: u8, register: u8, value: u32) {
        self.ap.insert((apsel, bank, register), value);
    }

    pub fn ap(&self, apsel: u8, bank: u8, register: u8) -> u32 {
        self.ap.get(&(apsel, bank, register)).copied().unwrap_or(0)
    }

    /// Number of register transactions performed or refused.
    pub fn transactions(&self) -> usize {
        self.history.iter().filter(|r| matches!(r, Request::Transact(_))).count()
    }

    fn ap_key(&self, register: u8) -> (u8, u8, u8) {
        let apsel = (self.select >> 24) as u8;
        let bank = ((self.select >> 4) & 0xF) as u8;
        (apsel, bank, register)
    }

    fn transact(&mut self, transaction: Transaction) -> Outcome {
        match self.script.pop_front() {
            Some(Scripted::Ack(Ack::Ok)) | None => (),
            Some(Scripted::Ack(ack)) => return Outcome::ack(ack),
            Some(Scripted::ProtocolError) => {
                return Outcome { protocol_error: true, ..Outcome::ack(Ack::Ok) };
            },
        }

        let Transaction { port, direction, register, data } = transaction;
        match (port, direction) {
            (Port::DP, Direction::Read) => {
                let value = match register {
                    DP_DPIDR => SIM_DPIDR,
                    DP_CTRL_STAT => self.ctrl_stat,
                    DP_SELECT => self.select,
                    DP_RDBUFF => self.rdbuff,
                    _ => 0,
                };
                Outcome::ok(value)
            },
            (Port::DP, Direction::Write) => {
                match register {
                    DP_DPIDR => self.abort = Some(data),
                    // Power-up requests are acknowledged one bit above.
                    DP_CTRL_STAT => self.ctrl_stat = data | ((data & CTRL_PWRUPREQ) << 1),
                    DP_SELECT => self.select = data,
                    _ => (),
                }
                Outcome::ok(0)
            },
            (Port::AP, Direction::Read) => {
                let key = self.ap_key(register);
                // AP reads are posted: the value arrives on the next read.
                let previous = self.rdbuff;
                self.rdbuff = self.ap.get(&key).copied().unwrap_or(0);
                Outcome::ok(previous)
            },
            (Port::AP, Direction::Write) => {
                let key = self.ap_key(register);
                self.ap.insert(key, data);
                Outcome::ok(0)
            },
        }
    }
}

impl Transactor for SimTarget {
    fn execute(&mut self, request: Request) -> Outcome {
        self.history.push(request);
        match request {
            Request::Reset => {
                self.resets += 1;
                Outcome::ok(0)
            },
            Request::Pins { output, select, wait_us } => {
                self.pins = (self.pins & !select) | (output & select);
                self.waited_us += wait_us as u64;
                Outcome::ok(self.pins as u32)
            },
            Request::Transact(transaction) => self.transact(transaction),
            Request::SetProtocol(protocol) => {
                self.protocol = protocol;
                Outcome::ok(0)
            },
            Request::SetClock { divisor } => {
                self.divisor = divisor;
                Outcome::ok(0)
            },
            Request::SetConfig(wire) => {
                self.wire = wire;
                Outcome::ok(0)
            },
            Request::Wait { us } => {
                self.waited_us += us as u64;
                Outcome::ok(0)
            },
            Request::ClearError => Outcome::ok(0),
            Request::SwjBit(bit) => {
                self.swj_bits.push(bit);
                Outcome::ok(0)
            },
            Request::JtagBit { tdi, .. } => Outcome::ok(tdi as u32),
            Request::SwdBit { output: Some(bit) } => {
                self.swd_bits.push(bit);
                Outcome::ok(0)
            },
            Request::SwdBit { output: None } => {
                let bit = self.swd_input.pop_front().unwrap_or(true);
                Outcome::ok(bit as u32)
            },
        }
    }
}

#[test]
fn test_dp_registers() {
    let mut sim = SimTarget::new();
    assert_eq!(sim.execute(Request::Transact(Transaction::read(Port::DP, 0))), Outcome::ok(SIM_DPIDR));
    sim.execute(Request::Transact(Transaction::write(Port::DP, 1, 0x5000_0000)));
    assert_eq!(sim.execute(Request::Transact(Transaction::read(Port::DP, 1))).data, 0xF000_0000);
    sim.execute(Request::Transact(Transaction::write(Port::DP, 0, 0x1E)));
    assert_eq!(sim.abort, Some(0x1E));
}

#[test]
fn test_ap_reads_are_posted() {
    let mut sim = SimTarget::new();
    sim.execute(Request::Transact(Transaction::write(Port::DP, 2, 0x0000_00F0)));
    assert_eq!(sim.execute(Request::Transact(Transaction::read(Port::AP, 3))).data, 0);
    assert_eq!(sim.execute(Request::Transact(Transaction::read(Port::DP, 3))).data, SIM_AP_IDR);

    sim.execute(Request::Transact(Transaction::write(Port::DP, 2, 0)));
    sim.execute(Request::Transact(Transaction::write(Port::AP, 1, 0x2000_0000)));
    assert_eq!(sim.ap(0, 0, 1), 0x2000_0000);
}

#[test]
fn test_scripted_acks() {
    let mut sim = SimTarget::new();
    sim.script_ack(Ack::Wait);
    sim.script_protocol_error();
    let read = Request::Transact(Transaction::read(Port::DP, 0));
    assert_eq!(sim.execute(read), Outcome::ack(Ack::Wait));
    assert!(sim.execute(read).protocol_error);
    assert!(sim.execute(read).is_ok());
    assert_eq!(sim.transactions(), 3);
}

#[test]
fn test_jtag_loopback() {
    let mut sim = SimTarget::new();
    assert!(sim.execute(Request::JtagBit { tms: false, tdi: true }).bit());
    assert!(!sim.execute(Request::JtagBit { tms: true, tdi: false }).bit());
}
