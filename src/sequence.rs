//! SWJ, JTAG and SWD sequence sub-engines.
//!
//! These commands carry data-dependent payloads, so instead of buffering the
//! whole packet each byte is shifted out through the transactor as soon as it
//! arrives. Captured TDO or SWDIO bits are packed into the response.

use crate::bitvec::{byte_bits, Capture};
use crate::command::ResponseStatus;
use crate::engine::{Engine, Step};
use crate::transactor::{Request, Transactor};

/// Decode a sequence bit count where 0 stands for the largest count.
fn bit_count(count: u8, mask: u8, zero: usize) -> usize {
    match count & mask {
        0 => zero,
        n => n as usize,
    }
}

pub(crate) enum SwjSequence {
    Count,
    Bits { remaining: usize },
}

impl SwjSequence {
    pub(crate) fn new() -> Self {
        SwjSequence::Count
    }
}

/// Phase within one JTAG or SWD sequence packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Count,
    Info,
    /// Data bytes for the current item. `tms` and `capture` only apply to JTAG.
    Data { cycles: usize, tms: bool, capture: bool },
}

/// Item bookkeeping shared by JTAG and SWD sequences.
struct Items {
    remaining: u8,
    phase: Phase,
    capture: Capture,
}

impl Items {
    fn new() -> Self {
        Items { remaining: 0, phase: Phase::Count, capture: Capture::new() }
    }

    /// Close off one item, returning true if it was the last.
    fn item_done(&mut self) -> bool {
        self.capture.align();
        self.remaining -= 1;
        self.phase = Phase::Info;
        self.remaining == 0
    }
}

pub(crate) struct JtagSequence(Items);

impl JtagSequence {
    pub(crate) fn new() -> Self {
        JtagSequence(Items::new())
    }
}

pub(crate) struct SwdSequence(Items);

impl SwdSequence {
    pub(crate) fn new() -> Self {
        SwdSequence(Items::new())
    }
}

impl<T: Transactor> Engine<T> {
    pub(crate) fn swj_sequence(&mut self, seq: SwjSequence, byte: u8) -> Step<SwjSequence> {
        match seq {
            SwjSequence::Count => {
                let remaining = bit_count(byte, 0xFF, 256);
                log::trace!("SWJ sequence of {} bits", remaining);
                Step::Continue(SwjSequence::Bits { remaining })
            },
            SwjSequence::Bits { remaining } => {
                for bit in byte_bits(byte, remaining) {
                    self.transactor.execute(Request::SwjBit(bit));
                }
                let remaining = remaining.saturating_sub(8);
                if remaining == 0 {
                    self.framer.write_u8(ResponseStatus::DAP_OK.into());
                    Step::Done
                } else {
                    Step::Continue(SwjSequence::Bits { remaining })
                }
            },
        }
    }

    pub(crate) fn swj_sequence_truncated(&mut self, seq: SwjSequence) {
        match seq {
            SwjSequence::Count => self.framing_error(),
            SwjSequence::Bits { remaining } => {
                log::warn!("SWJ sequence ended with {} bits outstanding", remaining);
                self.framer.write_u8(ResponseStatus::DAP_ERROR.into());
            },
        }
    }

    pub(crate) fn jtag_sequence(&mut self, seq: JtagSequence, byte: u8) -> Step<JtagSequence> {
        let JtagSequence(mut items) = seq;
        match items.phase {
            Phase::Count => {
                if byte == 0 {
                    self.framer.write_u8(ResponseStatus::DAP_OK.into());
                    return Step::Done;
                }
                items.remaining = byte;
                items.phase = Phase::Info;
            },
            Phase::Info => {
                items.phase = Phase::Data {
                    cycles: bit_count(byte, 0x3F, 64),
                    tms: byte & 0x40 != 0,
                    capture: byte & 0x80 != 0,
                };
            },
            Phase::Data { cycles, tms, capture } => {
                for tdi in byte_bits(byte, cycles) {
                    let outcome = self.transactor.execute(Request::JtagBit { tms, tdi });
                    if capture {
                        items.capture.push(outcome.bit());
                    }
                }
                let cycles = cycles.saturating_sub(8);
                if cycles > 0 {
                    items.phase = Phase::Data { cycles, tms, capture };
                } else if items.item_done() {
                    self.finish_sequence(&items);
                    return Step::Done;
                }
            },
        }
        Step::Continue(JtagSequence(items))
    }

    pub(crate) fn jtag_sequence_truncated(&mut self, seq: JtagSequence) {
        self.sequence_truncated(seq.0);
    }

    pub(crate) fn swd_sequence(&mut self, seq: SwdSequence, byte: u8) -> Step<SwdSequence> {
        let SwdSequence(mut items) = seq;
        match items.phase {
            Phase::Count => {
                if byte == 0 {
                    self.framer.write_u8(ResponseStatus::DAP_OK.into());
                    return Step::Done;
                }
                items.remaining = byte;
                items.phase = Phase::Info;
            },
            Phase::Info => {
                let cycles = bit_count(byte, 0x3F, 64);
                if byte & 0x80 == 0 {
                    items.phase = Phase::Data { cycles, tms: false, capture: false };
                } else {
                    // Input items carry no data bytes, so sample immediately.
                    for _ in 0..cycles {
                        let outcome = self.transactor.execute(Request::SwdBit { output: None });
                        items.capture.push(outcome.bit());
                    }
                    if items.item_done() {
                        self.finish_sequence(&items);
                        return Step::Done;
                    }
                }
            },
            Phase::Data { cycles, .. } => {
                for bit in byte_bits(byte, cycles) {
                    self.transactor.execute(Request::SwdBit { output: Some(bit) });
                }
                let cycles = cycles.saturating_sub(8);
                if cycles > 0 {
                    items.phase = Phase::Data { cycles, tms: false, capture: false };
                } else if items.item_done() {
                    self.finish_sequence(&items);
                    return Step::Done;
                }
            },
        }
        Step::Continue(SwdSequence(items))
    }

    pub(crate) fn swd_sequence_truncated(&mut self, seq: SwdSequence) {
        self.sequence_truncated(seq.0);
    }

    fn finish_sequence(&mut self, items: &Items) {
        self.framer.write_u8(ResponseStatus::DAP_OK.into());
        self.framer.write_slice(items.capture.bytes());
    }

    fn sequence_truncated(&mut self, items: Items) {
        if items.phase == Phase::Count {
            self.framing_error();
        } else {
            log::warn!("Sequence ended with {} items outstanding", items.remaining);
            self.framer.write_u8(ResponseStatus::DAP_ERROR.into());
        }
    }
}

#[cfg(test)]
use crate::engine::test_engine;

#[test]
fn test_swj_sequence() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x12, 0x08, 0x00]).unwrap(), vec![0x12, 0x00]);
    assert_eq!(engine.transactor().swj_bits, bv![0, 0, 0, 0, 0, 0, 0, 0]);

    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x12, 0x03, 0x05]).unwrap(), vec![0x12, 0x00]);
    assert_eq!(engine.transactor().swj_bits, bv![1, 0, 1]);

    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x12, 0x0A, 0xFF, 0x02]).unwrap(), vec![0x12, 0x00]);
    assert_eq!(engine.transactor().swj_bits, bv![1, 1, 1, 1, 1, 1, 1, 1, 0, 1]);
}

#[test]
fn test_swj_sequence_256() {
    let mut engine = test_engine();
    let mut packet = vec![0x12, 0x00];
    packet.extend(std::iter::repeat(0xFF).take(32));
    assert_eq!(engine.process(&packet).unwrap(), vec![0x12, 0x00]);
    assert_eq!(engine.transactor().swj_bits.len(), 256);
    assert!(engine.transactor().swj_bits.iter().all(|b| *b));
}

#[test]
fn test_swj_sequence_truncated() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x12, 0x10, 0xFF]).unwrap(), vec![0x12, 0xFF]);
    assert_eq!(engine.process(&[0x12]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x12, 0x08, 0x00]).unwrap(), vec![0x12, 0x00]);
}

#[test]
fn test_jtag_sequence_loopback() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x14, 0x01, 0x88, 0x91]).unwrap(), vec![0x14, 0x00, 0x91]);
}

#[test]
fn test_jtag_sequence_without_capture() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x14, 0x01, 0x08, 0x01]).unwrap(), vec![0x14, 0x00]);
    let tms: Vec<_> = engine.transactor().history.iter().filter_map(|r| match r {
        Request::JtagBit { tms, .. } => Some(*tms),
        _ => None,
    }).collect();
    assert_eq!(tms.len(), 8);
    assert!(tms.iter().all(|t| !t));

    assert_eq!(engine.process(&[0x14, 0x01, 0x42, 0x03]).unwrap(), vec![0x14, 0x00]);
    assert_eq!(engine.transactor().history.last(), Some(&Request::JtagBit { tms: true, tdi: true }));
}

#[test]
fn test_jtag_sequence_alignment() {
    let mut engine = test_engine();
    // Two 3-bit captures each start a new byte.
    assert_eq!(engine.process(&[0x14, 0x02, 0x83, 0x05, 0x83, 0x06]).unwrap(),
               vec![0x14, 0x00, 0x05, 0x06]);

    // Ten bits span two bytes, then an uncaptured item adds nothing.
    assert_eq!(engine.process(&[0x14, 0x02, 0x8A, 0x91, 0x02, 0x04, 0x00]).unwrap(),
               vec![0x14, 0x00, 0x91, 0x02]);

    // 64 cycles are encoded as 0.
    let mut packet = vec![0x14, 0x01, 0x80];
    packet.extend_from_slice(&[0xA5; 8]);
    let mut expected = vec![0x14, 0x00];
    expected.extend_from_slice(&[0xA5; 8]);
    assert_eq!(engine.process(&packet).unwrap(), expected);
}

#[test]
fn test_jtag_sequence_edge_cases() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x14, 0x00]).unwrap(), vec![0x14, 0x00]);
    assert_eq!(engine.process(&[0x14]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x14, 0x02, 0x88, 0x91]).unwrap(), vec![0x14, 0xFF]);
    assert_eq!(engine.process(&[0x14, 0x01, 0x90, 0x91]).unwrap(), vec![0x14, 0xFF]);
}

#[test]
fn test_swd_sequence() {
    let mut engine = test_engine();
    engine.transactor_mut().swd_input.extend(bv![1, 0, 1, 1, 0].iter().copied());
    let response = engine.process(&[0x1D, 0x02, 0x04, 0x0A, 0x85]).unwrap();
    assert_eq!(response, vec![0x1D, 0x00, 0x0D]);
    assert_eq!(engine.transactor().swd_bits, bv![0, 1, 0, 1]);

    // Two input items are each byte aligned.
    let response = engine.process(&[0x1D, 0x02, 0x82, 0x81]).unwrap();
    assert_eq!(response, vec![0x1D, 0x00, 0x03, 0x01]);
}

#[test]
fn test_swd_sequence_truncated() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x1D, 0x01, 0x10, 0xFF]).unwrap(), vec![0x1D, 0xFF]);
    assert_eq!(engine.process(&[0x1D]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x1D, 0x00]).unwrap(), vec![0x1D, 0x00]);
}
