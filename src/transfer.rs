//! DAP_Transfer and DAP_TransferBlock engines.
//!
//! Each transfer item is executed as soon as its request byte (and any data
//! bytes) have arrived. Read results are staged in the scratch buffer and
//! appended to the response once the command completes, after the count and
//! ack fields which are patched in place.
//!
//! Once an item fails, the remaining items are still parsed so that the rest
//! of the command's bytes are consumed, but nothing more is sent to the target.

use crate::engine::{Engine, Step};
use crate::transactor::{Ack, Direction, Outcome, Port, Request, Transaction, Transactor};

pub const TRANSFER_OK: u8 = 0x01;
pub const TRANSFER_WAIT: u8 = 0x02;
pub const TRANSFER_FAULT: u8 = 0x04;
pub const TRANSFER_ERROR: u8 = 0x08;
pub const TRANSFER_MISMATCH: u8 = 0x10;

/// DP register which returns the result of the previous posted AP read.
const DP_RDBUFF: u8 = 0x3;

/// Decoded transfer request byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub port: Port,
    pub direction: Direction,
    /// Register address bits A[3:2].
    pub register: u8,
    /// Read until the value matches the following word.
    pub value_match: bool,
    /// Write the following word to the match mask instead of the target.
    pub match_mask: bool,
    pub timestamp: bool,
}

impl From<u8> for TransferRequest {
    fn from(byte: u8) -> Self {
        TransferRequest {
            port: if byte & (1 << 0) != 0 { Port::AP } else { Port::DP },
            direction: if byte & (1 << 1) != 0 { Direction::Read } else { Direction::Write },
            register: (byte >> 2) & 0b11,
            value_match: byte & (1 << 4) != 0,
            match_mask: byte & (1 << 5) != 0,
            timestamp: byte & (1 << 7) != 0,
        }
    }
}

impl TransferRequest {
    /// Whether a data word follows this request byte.
    pub fn needs_data(&self) -> bool {
        self.direction == Direction::Write || self.value_match
    }
}

#[derive(Copy, Clone, Debug)]
enum TransferPhase {
    Index,
    Count,
    Request,
    Data { request: TransferRequest, data: u32, got: u8 },
}

pub(crate) struct Transfer {
    /// Response offset of the count byte; the ack byte follows it.
    header: usize,
    remaining: u8,
    completed: u8,
    ack: u8,
    failed: bool,
    phase: TransferPhase,
}

#[derive(Copy, Clone, Debug)]
enum BlockPhase {
    Index,
    CountLow,
    CountHigh(u8),
    Request,
    Data { request: TransferRequest, data: u32, got: u8 },
}

pub(crate) struct TransferBlock {
    /// Response offset of the 16-bit count; the ack byte follows it.
    header: usize,
    remaining: u16,
    completed: u16,
    ack: u8,
    failed: bool,
    phase: BlockPhase,
}

/// Accumulate one little-endian data byte, returning the word once complete.
fn accumulate(data: u32, got: u8, byte: u8) -> (u32, u8) {
    (data | (byte as u32) << (8 * got), got + 1)
}

impl<T: Transactor> Engine<T> {
    pub(crate) fn begin_transfer(&mut self) -> Transfer {
        self.scratch.reset();
        self.framer.write_u8(crate::command::Command::DAP_Transfer.into());
        let header = self.framer.position();
        self.framer.write_u8(0);
        self.framer.write_u8(0);
        Transfer { header, remaining: 0, completed: 0, ack: 0, failed: false, phase: TransferPhase::Index }
    }

    pub(crate) fn transfer(&mut self, mut t: Transfer, byte: u8) -> Step<Transfer> {
        match t.phase {
            TransferPhase::Index => t.phase = TransferPhase::Count,
            TransferPhase::Count => {
                if byte == 0 {
                    t.ack = TRANSFER_OK;
                    self.finish_transfer(&t);
                    return Step::Done;
                }
                t.remaining = byte;
                t.phase = TransferPhase::Request;
            },
            TransferPhase::Request => {
                let request = TransferRequest::from(byte);
                if request.needs_data() {
                    t.phase = TransferPhase::Data { request, data: 0, got: 0 };
                } else {
                    self.transfer_item(&mut t, request, 0);
                    return self.next_transfer(t);
                }
            },
            TransferPhase::Data { request, data, got } => {
                let (data, got) = accumulate(data, got, byte);
                if got < 4 {
                    t.phase = TransferPhase::Data { request, data, got };
                } else {
                    self.transfer_item(&mut t, request, data);
                    return self.next_transfer(t);
                }
            },
        }
        Step::Continue(t)
    }

    fn transfer_item(&mut self, t: &mut Transfer, request: TransferRequest, data: u32) {
        if t.failed {
            return;
        }
        t.ack = self.run_transfer(request, data);
        if t.ack == TRANSFER_OK {
            t.completed += 1;
        } else {
            log::debug!("Transfer {} failed with ack 0x{:02X}", t.completed + 1, t.ack);
            t.failed = true;
        }
    }

    fn next_transfer(&mut self, mut t: Transfer) -> Step<Transfer> {
        t.remaining -= 1;
        if t.remaining == 0 {
            self.finish_transfer(&t);
            Step::Done
        } else {
            t.phase = TransferPhase::Request;
            Step::Continue(t)
        }
    }

    fn finish_transfer(&mut self, t: &Transfer) {
        self.framer.write_u8_at(t.header, t.completed);
        self.framer.write_u8_at(t.header + 1, t.ack);
        self.write_staged();
    }

    pub(crate) fn transfer_truncated(&mut self, t: Transfer) {
        match t.phase {
            TransferPhase::Index | TransferPhase::Count => self.framing_error(),
            _ => {
                log::warn!("Transfer ended with {} items outstanding", t.remaining);
                self.finish_transfer(&t);
            },
        }
    }

    pub(crate) fn begin_transfer_block(&mut self) -> TransferBlock {
        self.scratch.reset();
        self.framer.write_u8(crate::command::Command::DAP_TransferBlock.into());
        let header = self.framer.position();
        self.framer.write_u16(0);
        self.framer.write_u8(0);
        TransferBlock { header, remaining: 0, completed: 0, ack: 0, failed: false, phase: BlockPhase::Index }
    }

    pub(crate) fn transfer_block(&mut self, mut b: TransferBlock, byte: u8) -> Step<TransferBlock> {
        match b.phase {
            BlockPhase::Index => b.phase = BlockPhase::CountLow,
            BlockPhase::CountLow => b.phase = BlockPhase::CountHigh(byte),
            BlockPhase::CountHigh(low) => {
                let count = u16::from_le_bytes([low, byte]);
                if count == 0 {
                    b.ack = TRANSFER_OK;
                    self.finish_transfer_block(&b);
                    return Step::Done;
                }
                b.remaining = count;
                b.phase = BlockPhase::Request;
            },
            BlockPhase::Request => {
                // Match bits have no meaning for block transfers.
                let request = TransferRequest::from(byte & 0x0F);
                if request.direction == Direction::Write {
                    b.phase = BlockPhase::Data { request, data: 0, got: 0 };
                } else {
                    while b.remaining > 0 && !b.failed {
                        self.block_item(&mut b, request, 0);
                    }
                    self.finish_transfer_block(&b);
                    return Step::Done;
                }
            },
            BlockPhase::Data { request, data, got } => {
                let (data, got) = accumulate(data, got, byte);
                if got < 4 {
                    b.phase = BlockPhase::Data { request, data, got };
                } else {
                    if !b.failed {
                        self.block_item(&mut b, request, data);
                    } else {
                        b.remaining -= 1;
                    }
                    if b.remaining == 0 {
                        self.finish_transfer_block(&b);
                        return Step::Done;
                    }
                    b.phase = BlockPhase::Data { request, data: 0, got: 0 };
                }
            },
        }
        Step::Continue(b)
    }

    fn block_item(&mut self, b: &mut TransferBlock, request: TransferRequest, data: u32) {
        b.ack = self.run_transfer(request, data);
        b.remaining -= 1;
        if b.ack == TRANSFER_OK {
            b.completed += 1;
        } else {
            log::debug!("Block transfer {} failed with ack 0x{:02X}", b.completed + 1, b.ack);
            b.failed = true;
        }
    }

    fn finish_transfer_block(&mut self, b: &TransferBlock) {
        self.framer.write_u16_at(b.header, b.completed);
        self.framer.write_u8_at(b.header + 2, b.ack);
        self.write_staged();
    }

    pub(crate) fn transfer_block_truncated(&mut self, b: TransferBlock) {
        match b.phase {
            BlockPhase::Index | BlockPhase::CountLow | BlockPhase::CountHigh(_) => self.framing_error(),
            _ => {
                log::warn!("Block transfer ended with {} items outstanding", b.remaining);
                self.finish_transfer_block(&b);
            },
        }
    }

    fn write_staged(&mut self) {
        for word in self.scratch.staged() {
            self.framer.write_u32(*word);
        }
    }

    /// Run one transfer item, returning the ack byte to report.
    fn run_transfer(&mut self, request: TransferRequest, data: u32) -> u8 {
        match request.direction {
            Direction::Write if request.match_mask => {
                self.config.match_mask = data;
                TRANSFER_OK
            },
            Direction::Write => {
                let transaction = Transaction::write(request.port, request.register, data);
                ack_byte(&self.transact(transaction))
            },
            Direction::Read if request.value_match => self.match_read(request, data),
            Direction::Read => {
                if self.scratch.is_full() {
                    log::warn!("Read result buffer full");
                    return TRANSFER_ERROR;
                }
                let outcome = self.read_register(request.port, request.register);
                if !outcome.is_ok() {
                    return ack_byte(&outcome);
                }
                match self.scratch.push(outcome.data) {
                    Ok(()) => TRANSFER_OK,
                    Err(e) => {
                        log::warn!("{}", e);
                        TRANSFER_ERROR
                    },
                }
            },
        }
    }

    /// Read a register until its masked value equals `value`, up to the match retry limit.
    fn match_read(&mut self, request: TransferRequest, value: u32) -> u8 {
        let mut retries = 0;
        loop {
            let outcome = self.read_register(request.port, request.register);
            if !outcome.is_ok() {
                return ack_byte(&outcome);
            }
            if outcome.data & self.config.match_mask == value {
                return TRANSFER_OK;
            }
            if retries >= self.config.match_retry {
                log::debug!("Value mismatch: read 0x{:08X}, expected 0x{:08X}", outcome.data, value);
                return TRANSFER_OK | TRANSFER_MISMATCH;
            }
            retries += 1;
        }
    }

    /// Read a DP or AP register. AP reads are posted, so the value is
    /// collected from RDBUFF.
    fn read_register(&mut self, port: Port, register: u8) -> Outcome {
        let outcome = self.transact(Transaction::read(port, register));
        match port {
            Port::DP => outcome,
            Port::AP if !outcome.is_ok() => outcome,
            Port::AP => self.transact(Transaction::read(Port::DP, DP_RDBUFF)),
        }
    }

    /// Issue one transaction, retrying WAIT acks up to the wait retry limit.
    fn transact(&mut self, transaction: Transaction) -> Outcome {
        let mut retries = 0;
        loop {
            let outcome = self.transactor.execute(Request::Transact(transaction));
            if outcome.protocol_error {
                self.transactor.execute(Request::ClearError);
                return outcome;
            }
            if outcome.ack == Ack::Wait && retries < self.config.wait_retry {
                retries += 1;
                continue;
            }
            return outcome;
        }
    }
}

fn ack_byte(outcome: &Outcome) -> u8 {
    if outcome.protocol_error {
        TRANSFER_ERROR
    } else {
        outcome.ack.into()
    }
}

#[cfg(test)]
use crate::engine::test_engine;

#[test]
fn test_transfer_request() {
    let request = TransferRequest::from(0x0F);
    assert_eq!(request.port, Port::AP);
    assert_eq!(request.direction, Direction::Read);
    assert_eq!(request.register, 3);
    assert!(!request.needs_data());
    assert!(TransferRequest::from(0x08).needs_data());
    assert!(TransferRequest::from(0x12).needs_data());
    assert!(TransferRequest::from(0x20).match_mask);
    assert!(TransferRequest::from(0x82).timestamp);
}

#[test]
fn test_transfer_reads_and_writes() {
    let mut engine = test_engine();
    let response = engine.process(&[0x05, 0x00, 0x01, 0x02]).unwrap();
    assert_eq!(response, vec![0x05, 0x01, 0x01, 0x77, 0x14, 0xA0, 0x2B]);

    // Select bank 0xF of AP 0 and read its IDR.
    let response = engine.process(&[0x05, 0x00, 0x02,
                                    0x08, 0xF0, 0x00, 0x00, 0x00,
                                    0x0F]).unwrap();
    assert_eq!(response, vec![0x05, 0x02, 0x01, 0x11, 0x00, 0x77, 0x24]);

    let response = engine.process(&[0x05, 0x00, 0x02,
                                    0x08, 0x00, 0x00, 0x00, 0x00,
                                    0x05, 0x78, 0x56, 0x34, 0x12]).unwrap();
    assert_eq!(response, vec![0x05, 0x02, 0x01]);
    assert_eq!(engine.transactor().ap(0, 0, 1), 0x1234_5678);
}

#[test]
fn test_transfer_count_zero() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x05, 0x00, 0x00]).unwrap(), vec![0x05, 0x00, 0x01]);
    assert_eq!(engine.transactor().transactions(), 0);
}

#[test]
fn test_transfer_stops_at_first_failure() {
    let mut engine = test_engine();
    engine.transactor_mut().script_ack(Ack::Ok);
    engine.transactor_mut().script_ack(Ack::Fault);
    let response = engine.process(&[0x05, 0x00, 0x03, 0x02, 0x02, 0x02]).unwrap();
    assert_eq!(response, vec![0x05, 0x01, 0x04, 0x77, 0x14, 0xA0, 0x2B]);
    assert_eq!(engine.transactor().transactions(), 2);

    // Skipped items still consume their data bytes.
    engine.transactor_mut().script_ack(Ack::NoAck);
    let response = engine.process(&[0x05, 0x00, 0x02,
                                    0x08, 0x01, 0x02, 0x03, 0x04,
                                    0x08, 0x01, 0x02, 0x03, 0x04]).unwrap();
    assert_eq!(response, vec![0x05, 0x00, 0x07]);
}

#[test]
fn test_transfer_wait_retry() {
    let mut engine = test_engine();
    engine.transactor_mut().script_ack(Ack::Wait);
    engine.transactor_mut().script_ack(Ack::Wait);
    assert_eq!(engine.process(&[0x05, 0x00, 0x01, 0x02]).unwrap(),
               vec![0x05, 0x01, 0x01, 0x77, 0x14, 0xA0, 0x2B]);
    assert_eq!(engine.transactor().transactions(), 3);

    engine.process(&[0x04, 0x00, 0x01, 0x00, 0x00, 0x00]).unwrap();
    engine.transactor_mut().script_ack(Ack::Wait);
    engine.transactor_mut().script_ack(Ack::Wait);
    assert_eq!(engine.process(&[0x05, 0x00, 0x01, 0x02]).unwrap(), vec![0x05, 0x00, 0x02]);
}

#[test]
fn test_transfer_protocol_error() {
    let mut engine = test_engine();
    engine.transactor_mut().script_protocol_error();
    assert_eq!(engine.process(&[0x05, 0x00, 0x01, 0x02]).unwrap(), vec![0x05, 0x00, 0x08]);
    assert_eq!(engine.transactor().history.last(), Some(&Request::ClearError));
}

#[test]
fn test_transfer_value_match() {
    let mut engine = test_engine();
    let response = engine.process(&[0x05, 0x00, 0x02,
                                    0x20, 0x00, 0x00, 0xFF, 0xFF,
                                    0x12, 0x00, 0x00, 0xA0, 0x2B]).unwrap();
    assert_eq!(response, vec![0x05, 0x02, 0x01]);
    assert_eq!(engine.config().match_mask, 0xFFFF_0000);

    let mut engine = test_engine();
    engine.process(&[0x04, 0x00, 0x00, 0x00, 0x02, 0x00]).unwrap();
    let response = engine.process(&[0x05, 0x00, 0x02,
                                    0x12, 0x78, 0x56, 0x34, 0x12,
                                    0x02]).unwrap();
    assert_eq!(response, vec![0x05, 0x00, 0x11]);
    assert_eq!(engine.transactor().transactions(), 3);
}

#[test]
fn test_transfer_scratch_full() {
    use crate::config::Settings;
    use crate::sim::SimTarget;
    // Room for two read results.
    let settings = Settings { max_packet_size: 12, ..Settings::default() };
    let mut engine = Engine::new(SimTarget::new(), settings);
    let response = engine.process(&[0x05, 0x00, 0x03, 0x02, 0x02, 0x02]).unwrap();
    assert_eq!(response, vec![0x05, 0x02, 0x08,
                              0x77, 0x14, 0xA0, 0x2B,
                              0x77, 0x14, 0xA0, 0x2B]);
}

#[test]
fn test_transfer_truncated() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x05, 0x00]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x05, 0x00, 0x02, 0x02]).unwrap(),
               vec![0x05, 0x01, 0x01, 0x77, 0x14, 0xA0, 0x2B]);
    assert_eq!(engine.process(&[0x05, 0x00, 0x01, 0x08, 0x01]).unwrap(), vec![0x05, 0x00, 0x00]);
}

#[test]
fn test_transfer_in_batch() {
    let mut engine = test_engine();
    engine.transactor_mut().script_ack(Ack::Ok);
    engine.transactor_mut().script_ack(Ack::Fault);
    let response = engine.process(&[0x7F, 0x02,
                                    0x05, 0x00, 0x02, 0x02, 0x02,
                                    0x03]).unwrap();
    assert_eq!(response, vec![0x7F, 0x02,
                              0x05, 0x01, 0x04, 0x77, 0x14, 0xA0, 0x2B,
                              0x03, 0x00]);
}

#[test]
fn test_transfer_block_read() {
    let mut engine = test_engine();
    engine.process(&[0x05, 0x00, 0x01, 0x08, 0xF0, 0x00, 0x00, 0x00]).unwrap();
    let response = engine.process(&[0x06, 0x00, 0x03, 0x00, 0x0F]).unwrap();
    let mut expected = vec![0x06, 0x03, 0x00, 0x01];
    for _ in 0..3 {
        expected.extend_from_slice(&[0x11, 0x00, 0x77, 0x24]);
    }
    assert_eq!(response, expected);
}

#[test]
fn test_transfer_block_read_follows_packet_size() {
    use crate::config::Settings;
    use crate::sim::SimTarget;
    let settings = Settings { max_packet_size: 1024, ..Settings::default() };
    let mut engine = Engine::new(SimTarget::new(), settings);
    let response = engine.process(&[0x06, 0x00, 100, 0x00, 0x02]).unwrap();
    assert_eq!(response.len(), 4 + 100 * 4);
    assert_eq!(&response[..4], &[0x06, 100, 0x00, 0x01]);
    assert_eq!(&response[400..], &[0x77, 0x14, 0xA0, 0x2B]);
}

#[test]
fn test_transfer_block_wait_retry() {
    let mut engine = test_engine();
    engine.transactor_mut().script_ack(Ack::Wait);
    let response = engine.process(&[0x06, 0x00, 0x02, 0x00, 0x02]).unwrap();
    assert_eq!(response, vec![0x06, 0x02, 0x00, 0x01,
                              0x77, 0x14, 0xA0, 0x2B,
                              0x77, 0x14, 0xA0, 0x2B]);
    assert_eq!(engine.transactor().transactions(), 3);

    // Out of retries, the WAIT is reported and nothing is read.
    engine.process(&[0x04, 0x00, 0x01, 0x00, 0x00, 0x00]).unwrap();
    engine.transactor_mut().script_ack(Ack::Wait);
    engine.transactor_mut().script_ack(Ack::Wait);
    assert_eq!(engine.process(&[0x06, 0x00, 0x02, 0x00, 0x02]).unwrap(),
               vec![0x06, 0x00, 0x00, 0x02]);
}

#[test]
fn test_transfer_block_read_failure() {
    let mut engine = test_engine();
    engine.transactor_mut().script_ack(Ack::Wait);
    engine.transactor_mut().script_ack(Ack::Ok);
    engine.transactor_mut().script_ack(Ack::Fault);
    let response = engine.process(&[0x06, 0x00, 0x03, 0x00, 0x02]).unwrap();
    assert_eq!(response, vec![0x06, 0x01, 0x00, 0x04, 0x77, 0x14, 0xA0, 0x2B]);
    assert_eq!(engine.transactor().transactions(), 3);

    // A failed posted AP read reports no data.
    engine.transactor_mut().script_ack(Ack::Fault);
    let response = engine.process(&[0x06, 0x00, 0x02, 0x00, 0x0F]).unwrap();
    assert_eq!(response, vec![0x06, 0x00, 0x00, 0x04]);
}

#[test]
fn test_transfer_block_write() {
    let mut engine = test_engine();
    let response = engine.process(&[0x06, 0x00, 0x02, 0x00, 0x05,
                                    0x01, 0x00, 0x00, 0x00,
                                    0x02, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(response, vec![0x06, 0x02, 0x00, 0x01]);
    assert_eq!(engine.transactor().ap(0, 0, 1), 2);

    engine.transactor_mut().script_ack(Ack::Ok);
    engine.transactor_mut().script_ack(Ack::Fault);
    let response = engine.process(&[0x06, 0x00, 0x03, 0x00, 0x05,
                                    0x01, 0x00, 0x00, 0x00,
                                    0x02, 0x00, 0x00, 0x00,
                                    0x03, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(response, vec![0x06, 0x01, 0x00, 0x04]);
    assert_eq!(engine.transactor().ap(0, 0, 1), 1);
}

#[test]
fn test_transfer_block_edge_cases() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x06, 0x00, 0x00, 0x00]).unwrap(), vec![0x06, 0x00, 0x00, 0x01]);
    assert_eq!(engine.process(&[0x06, 0x00, 0x02]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x06, 0x00, 0x02, 0x00, 0x05, 0x01, 0x00, 0x00, 0x00]).unwrap(),
               vec![0x06, 0x01, 0x00, 0x01]);
}
