//! Bit helpers for the sequence engines.
//!
//! CMSIS-DAP sends and receives sequence data least-significant-bit first,
//! with each sequence starting on a fresh byte.

/// Returns number of whole bytes required to hold `n` bits.
pub fn bytes_for_bits(n: usize) -> usize {
    (n + 7) / 8
}

/// Convert a slice of bits to a Vec of u8s, least-significant-bit first.
///
/// If `bits` is not a multiple of 8, the final byte has the higher-order
/// bits set to 0.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bytes_for_bits(bits.len()));
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (idx, bit) in chunk.iter().enumerate() {
            byte |= (*bit as u8) << idx;
        }
        bytes.push(byte);
    }
    bytes
}

/// Iterate over the low `n` bits of `byte`, least-significant-bit first.
pub fn byte_bits(byte: u8, n: usize) -> impl Iterator<Item = bool> {
    (0..n.min(8)).map(move |idx| (byte >> idx) & 1 == 1)
}

/// Accumulates captured bits (TDO or SWDIO) into response bytes.
#[derive(Clone, Debug, Default)]
pub struct Capture {
    pending: Vec<bool>,
    bytes: Vec<u8>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bit: bool) {
        self.pending.push(bit);
        if self.pending.len() == 8 {
            self.flush();
        }
    }

    /// Close off the current sequence, zero-padding any partial byte.
    pub fn align(&mut self) {
        if !self.pending.is_empty() {
            self.flush();
        }
    }

    /// All completed bytes. Bits pushed since the last `align` are not included
    /// until they fill a byte.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn flush(&mut self) {
        self.bytes.extend(bits_to_bytes(&self.pending));
        self.pending.clear();
    }
}

/// Convenience macro for creating a &[bool] from &[u8] of 0/1.
#[cfg(test)]
macro_rules! bv {
    ($($x:expr),*) => {
        &[ $(($x != 0),)* ] as &[bool]
    }
}

#[test]
fn test_bits_to_bytes() {
    assert_eq!(bits_to_bytes(&[]),                                      vec![]);
    assert_eq!(bits_to_bytes(bv![1, 1, 1, 0]),                          vec![0x07]);
    assert_eq!(bits_to_bytes(bv![1, 1, 1, 0, 0, 1, 0, 0]),              vec![0x27]);
    assert_eq!(bits_to_bytes(bv![1, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0, 1]),  vec![0x27, 0x08]);
}

#[test]
fn test_byte_bits() {
    assert_eq!(byte_bits(0xFF, 1).collect::<Vec<_>>(), bv![1]);
    assert_eq!(byte_bits(0x91, 8).collect::<Vec<_>>(), bv![1, 0, 0, 0, 1, 0, 0, 1]);
    assert_eq!(byte_bits(0x91, 3).collect::<Vec<_>>(), bv![1, 0, 0]);
    assert_eq!(byte_bits(0x91, 12).count(), 8);
}

#[test]
fn test_bytes_for_bits() {
    assert_eq!(bytes_for_bits(0), 0);
    assert_eq!(bytes_for_bits(1), 1);
    assert_eq!(bytes_for_bits(8), 1);
    assert_eq!(bytes_for_bits(64), 8);
}

#[test]
fn test_capture() {
    let mut capture = Capture::new();
    for bit in bv![1, 0, 0, 0, 1, 0, 0, 1, 1, 1] {
        capture.push(*bit);
    }
    assert_eq!(capture.bytes(), &[0x91]);
    capture.align();
    assert_eq!(capture.bytes(), &[0x91, 0x03]);

    // Aligning on a byte boundary adds nothing.
    capture.align();
    assert_eq!(capture.bytes().len(), 2);
}
