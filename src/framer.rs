//! Packet framing between the transport and the engine.
//!
//! On the receive side the framer holds the fixed parameter block of simple
//! commands. On the transmit side it owns the response being built and streams
//! it back out one byte at a time, asserting busy until the final byte leaves.

use crate::command::{MAX_FIXED_PARAMS, DAP_INVALID};

/// A byte delivered by the transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RxByte {
    pub byte: u8,
    /// First byte of a packet.
    pub first: bool,
    /// Last byte of a packet.
    pub last: bool,
}

impl RxByte {
    pub fn new(byte: u8, first: bool, last: bool) -> Self {
        RxByte { byte, first, last }
    }
}

/// A byte handed back to the transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TxByte {
    pub byte: u8,
    /// Last byte of the response packet.
    pub last: bool,
}

pub struct Framer {
    params: [u8; MAX_FIXED_PARAMS],
    rx_expected: usize,
    rx_len: usize,
    tx: Vec<u8>,
    tx_sent: usize,
    busy: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Framer {
            params: [0; MAX_FIXED_PARAMS],
            rx_expected: 0,
            rx_len: 0,
            tx: Vec::new(),
            tx_sent: 0,
            busy: false,
        }
    }

    /// Clear all per-packet state ready for a new packet.
    pub fn reset(&mut self) {
        self.rx_expected = 0;
        self.rx_len = 0;
        self.tx.clear();
        self.tx_sent = 0;
        self.busy = false;
    }

    /// True while a response is waiting to be drained; no bytes may be received.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Start collecting `n` fixed parameter bytes.
    pub fn expect(&mut self, n: usize) {
        debug_assert!(n <= MAX_FIXED_PARAMS);
        self.rx_expected = n;
        self.rx_len = 0;
    }

    /// Store one parameter byte, returning true once all expected bytes are in.
    pub fn collect(&mut self, byte: u8) -> bool {
        if self.rx_len < self.rx_expected {
            self.params[self.rx_len] = byte;
            self.rx_len += 1;
        }
        self.rx_len == self.rx_expected
    }

    /// Copy of the collected parameter block.
    pub fn params(&self) -> [u8; MAX_FIXED_PARAMS] {
        self.params
    }

    pub fn write_u8(&mut self, value: u8) {
        self.tx.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.tx.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.tx.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_slice(&mut self, data: &[u8]) {
        self.tx.extend_from_slice(data);
    }

    pub fn write_u8_at(&mut self, idx: usize, value: u8) {
        self.tx[idx] = value;
    }

    pub fn write_u16_at(&mut self, idx: usize, value: u16) {
        self.tx[idx..idx + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Current length of the response, used to remember where a field lives.
    pub fn position(&self) -> usize {
        self.tx.len()
    }

    /// Replace everything written from `start` onwards with the Invalid byte.
    pub fn invalid_from(&mut self, start: usize) {
        self.tx.truncate(start);
        self.tx.push(DAP_INVALID);
    }

    pub fn response(&self) -> &[u8] {
        &self.tx
    }

    /// Stop receiving and begin draining the response.
    pub fn start_tx(&mut self) {
        log::trace!("TX: {:02X?}", self.tx);
        self.tx_sent = 0;
        self.busy = true;
    }

    /// Take the next response byte, if a response is being drained.
    ///
    /// After the last byte is taken, all per-packet counters are cleared and
    /// the framer stops being busy.
    pub fn pop(&mut self) -> Option<TxByte> {
        if !self.busy {
            return None;
        }
        let byte = *self.tx.get(self.tx_sent)?;
        self.tx_sent += 1;
        let last = self.tx_sent == self.tx.len();
        if last {
            self.reset();
        }
        Some(TxByte { byte, last })
    }
}

#[test]
fn test_collect() {
    let mut framer = Framer::new();
    framer.expect(2);
    assert!(!framer.collect(0x01));
    assert!(framer.collect(0x02));
    assert_eq!(&framer.params()[..2], &[0x01, 0x02]);
}

#[test]
fn test_patch_and_drain() {
    let mut framer = Framer::new();
    framer.write_u8(0x06);
    let at = framer.position();
    framer.write_u16(0);
    framer.write_u8(0);
    framer.write_u16_at(at, 0x0102);
    framer.write_u8_at(at + 2, 0x01);
    assert_eq!(framer.response(), &[0x06, 0x02, 0x01, 0x01]);

    assert_eq!(framer.pop(), None);
    framer.start_tx();
    assert!(framer.is_busy());
    let mut out = Vec::new();
    while let Some(tx) = framer.pop() {
        out.push((tx.byte, tx.last));
    }
    assert_eq!(out, vec![(0x06, false), (0x02, false), (0x01, false), (0x01, true)]);
    assert!(!framer.is_busy());
    assert!(framer.response().is_empty());
}

#[test]
fn test_invalid_from() {
    let mut framer = Framer::new();
    framer.write_slice(&[0x7F, 0x02, 0x03, 0x00]);
    framer.write_slice(&[0x00, 0x04]);
    framer.invalid_from(4);
    assert_eq!(framer.response(), &[0x7F, 0x02, 0x03, 0x00, 0xFF]);
}
