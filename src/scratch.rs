//! Staging area for read results produced during a Transfer or TransferBlock.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Scratch buffer full.")]
    Full,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fixed-capacity array of 32-bit read results with a single write cursor.
///
/// Contents only remain valid until the next `reset`, which happens at the
/// start of each Transfer or TransferBlock packet.
pub struct Scratch {
    words: Vec<u32>,
    cursor: usize,
}

impl Scratch {
    pub fn new(capacity: usize) -> Self {
        Scratch { words: vec![0; capacity], cursor: 0 }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn push(&mut self, word: u32) -> Result<()> {
        match self.words.get_mut(self.cursor) {
            Some(slot) => {
                *slot = word;
                self.cursor += 1;
                Ok(())
            },
            None => Err(Error::Full),
        }
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.words.len()
    }

    /// Words staged since the last reset, in the order they were pushed.
    pub fn staged(&self) -> &[u32] {
        &self.words[..self.cursor]
    }
}

#[test]
fn test_scratch() {
    let mut scratch = Scratch::new(2);
    assert!(scratch.staged().is_empty());
    scratch.push(0x1122_3344).unwrap();
    scratch.push(0x5566_7788).unwrap();
    assert!(scratch.is_full());
    assert_eq!(scratch.push(1), Err(Error::Full));
    assert_eq!(scratch.staged(), &[0x1122_3344, 0x5566_7788]);
    scratch.reset();
    assert!(!scratch.is_full());
    scratch.push(9).unwrap();
    assert_eq!(scratch.staged(), &[9]);
}
