//! The command-processing engine.
//!
//! `Engine` accepts packet bytes one at a time from the transport, decodes
//! the command they carry, drives the transactor as needed, and builds the
//! response which the transport then drains with `pop`.
//!
//! Processing is an explicit state machine. Each state has a function which
//! consumes one byte and returns the next state; sub-engines for streamed
//! commands live in the `sequence` and `transfer` modules and fixed-parameter
//! handlers in `handlers`.

use std::convert::TryFrom;
use std::mem;
use thiserror::Error;

use crate::command::{Command, Params};
use crate::config::{ProbeConfig, Settings};
use crate::framer::{Framer, RxByte, TxByte};
use crate::scratch::Scratch;
use crate::sequence::{JtagSequence, SwdSequence, SwjSequence};
use crate::transactor::Transactor;
use crate::transfer::{Transfer, TransferBlock};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Engine is busy sending a response.")]
    Busy,
    #[error("Packet is empty.")]
    EmptyPacket,
    #[error("Packet did not produce a response.")]
    Incomplete,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Processing state between bytes.
pub(crate) enum State {
    /// Waiting for the first byte of a packet.
    Idle,
    /// Waiting for the ID byte of the next command in an ExecuteCommands batch.
    NextCommand,
    /// Collecting a fixed-length parameter block.
    CollectingParams(Command),
    /// Waiting for the number of commands in a batch, whose count is written at the given offset.
    BatchCount(usize),
    SwjSequence(SwjSequence),
    SwdSequence(SwdSequence),
    JtagSequence(JtagSequence),
    Transfer(Transfer),
    TransferBlock(TransferBlock),
    /// Response is complete; discarding any remaining bytes of the packet.
    Draining,
    /// Response is being drained by the transport.
    Responding,
}

/// Result of feeding one byte to a sub-engine.
pub(crate) enum Step<S> {
    Continue(S),
    Done,
}

struct Batch {
    count_at: usize,
    remaining: u8,
    executed: u8,
}

pub struct Engine<T: Transactor> {
    pub(crate) transactor: T,
    pub(crate) settings: Settings,
    pub(crate) config: ProbeConfig,
    pub(crate) framer: Framer,
    pub(crate) scratch: Scratch,
    /// Offset in the response of the current command's echoed ID.
    pub(crate) cmd_start: usize,
    state: State,
    batch: Option<Batch>,
}

impl<T: Transactor> Engine<T> {
    pub fn new(transactor: T, settings: Settings) -> Self {
        let scratch = Scratch::new(settings.scratch_words());
        Engine {
            transactor,
            settings,
            config: ProbeConfig::default(),
            framer: Framer::new(),
            scratch,
            cmd_start: 0,
            state: State::Idle,
            batch: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn transactor(&self) -> &T {
        &self.transactor
    }

    pub fn transactor_mut(&mut self) -> &mut T {
        &mut self.transactor
    }

    pub fn into_transactor(self) -> T {
        self.transactor
    }

    /// True if the engine can accept another byte from the transport.
    pub fn ready(&self) -> bool {
        !self.framer.is_busy()
    }

    /// True if no packet is being received or answered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Accept one byte from the transport.
    ///
    /// Returns `Error::Busy` if a response is still being drained.
    pub fn push(&mut self, rx: RxByte) -> Result<()> {
        if self.framer.is_busy() {
            return Err(Error::Busy);
        }

        if rx.first {
            if !self.is_idle() {
                log::warn!("Packet started before previous packet ended, discarding it");
            }
            self.framer.reset();
            self.batch = None;
            self.state = State::Idle;
        } else if self.is_idle() {
            log::trace!("Ignoring byte 0x{:02X} received outside a packet", rx.byte);
            return Ok(());
        }

        log::trace!("RX: 0x{:02X}", rx.byte);
        let byte = rx.byte;
        let state = mem::replace(&mut self.state, State::Idle);
        self.state = match state {
            State::Idle | State::NextCommand => self.begin_command(byte),
            State::CollectingParams(command) => {
                if self.framer.collect(byte) {
                    self.dispatch(command)
                } else {
                    State::CollectingParams(command)
                }
            },
            State::BatchCount(count_at) => self.batch_count(count_at, byte),
            State::SwjSequence(seq) => {
                let step = self.swj_sequence(seq, byte);
                self.advance(step, State::SwjSequence)
            },
            State::SwdSequence(seq) => {
                let step = self.swd_sequence(seq, byte);
                self.advance(step, State::SwdSequence)
            },
            State::JtagSequence(seq) => {
                let step = self.jtag_sequence(seq, byte);
                self.advance(step, State::JtagSequence)
            },
            State::Transfer(transfer) => {
                let step = self.transfer(transfer, byte);
                self.advance(step, State::Transfer)
            },
            State::TransferBlock(block) => {
                let step = self.transfer_block(block, byte);
                self.advance(step, State::TransferBlock)
            },
            State::Draining => State::Draining,
            State::Responding => State::Responding,
        };

        if rx.last {
            self.end_of_packet();
        }

        Ok(())
    }

    /// Take the next response byte for the transport, if one is ready.
    pub fn pop(&mut self) -> Option<TxByte> {
        let tx = self.framer.pop()?;
        if tx.last {
            self.state = State::Idle;
        }
        Some(tx)
    }

    /// Run a complete packet through the engine and return its response.
    pub fn process(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        if packet.is_empty() {
            return Err(Error::EmptyPacket);
        }

        let last = packet.len() - 1;
        for (idx, byte) in packet.iter().enumerate() {
            self.push(RxByte::new(*byte, idx == 0, idx == last))?;
        }

        let mut response = Vec::new();
        while let Some(tx) = self.pop() {
            response.push(tx.byte);
            if tx.last {
                return Ok(response);
            }
        }
        Err(Error::Incomplete)
    }

    fn begin_command(&mut self, id: u8) -> State {
        self.cmd_start = self.framer.position();
        let command = match Command::try_from(id) {
            Ok(command) if !(command.is_batch() && self.batch.is_some()) => command,
            _ => {
                log::debug!("Unknown command 0x{:02X}", id);
                self.framer.invalid_from(self.cmd_start);
                self.close_batch();
                return State::Draining;
            },
        };

        log::debug!("Processing {:?}", command);
        match command.params() {
            Params::Fixed(0) => self.dispatch(command),
            Params::Fixed(n) => {
                self.framer.expect(n);
                State::CollectingParams(command)
            },
            Params::Streamed => self.begin_streamed(command),
        }
    }

    fn begin_streamed(&mut self, command: Command) -> State {
        match command {
            Command::DAP_SWJ_Sequence => {
                self.framer.write_u8(command.into());
                State::SwjSequence(SwjSequence::new())
            },
            Command::DAP_SWD_Sequence => {
                self.framer.write_u8(command.into());
                State::SwdSequence(SwdSequence::new())
            },
            Command::DAP_JTAG_Sequence => {
                self.framer.write_u8(command.into());
                State::JtagSequence(JtagSequence::new())
            },
            Command::DAP_Transfer => State::Transfer(self.begin_transfer()),
            Command::DAP_TransferBlock => State::TransferBlock(self.begin_transfer_block()),
            _ => {
                // Queued commands are answered as if they had been executed directly.
                self.framer.write_u8(Command::DAP_ExecuteCommands.into());
                let count_at = self.framer.position();
                self.framer.write_u8(0);
                State::BatchCount(count_at)
            },
        }
    }

    fn dispatch(&mut self, command: Command) -> State {
        let params = self.framer.params();
        self.handle(command, &params);
        self.command_done()
    }

    fn batch_count(&mut self, count_at: usize, count: u8) -> State {
        log::debug!("Executing batch of {} commands", count);
        if count == 0 {
            return State::Draining;
        }
        self.batch = Some(Batch { count_at, remaining: count, executed: 0 });
        State::NextCommand
    }

    fn advance<S>(&mut self, step: Step<S>, wrap: fn(S) -> State) -> State {
        match step {
            Step::Continue(inner) => wrap(inner),
            Step::Done => self.command_done(),
        }
    }

    /// Move on after a command has written its complete response.
    fn command_done(&mut self) -> State {
        if let Some(batch) = self.batch.as_mut() {
            batch.executed += 1;
            batch.remaining -= 1;
            if batch.remaining > 0 {
                return State::NextCommand;
            }
            self.close_batch();
        }
        State::Draining
    }

    /// Write the executed count of any open batch and close it.
    fn close_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.framer.write_u8_at(batch.count_at, batch.executed);
        }
    }

    /// Replace the whole response with the Invalid byte.
    pub(crate) fn framing_error(&mut self) {
        log::warn!("Packet ended before command was complete");
        self.batch = None;
        self.framer.invalid_from(0);
    }

    fn end_of_packet(&mut self) {
        let state = mem::replace(&mut self.state, State::Idle);
        let truncated = match state {
            State::Draining => false,
            State::Idle | State::NextCommand | State::BatchCount(_) | State::CollectingParams(_) => {
                self.framing_error();
                false
            },
            State::SwjSequence(seq) => {
                self.swj_sequence_truncated(seq);
                true
            },
            State::SwdSequence(seq) => {
                self.swd_sequence_truncated(seq);
                true
            },
            State::JtagSequence(seq) => {
                self.jtag_sequence_truncated(seq);
                true
            },
            State::Transfer(transfer) => {
                self.transfer_truncated(transfer);
                true
            },
            State::TransferBlock(block) => {
                self.transfer_block_truncated(block);
                true
            },
            State::Responding => {
                self.state = State::Responding;
                return;
            },
        };

        if truncated {
            if let Some(batch) = self.batch.as_mut() {
                batch.executed += 1;
            }
        }
        self.close_batch();

        self.framer.start_tx();
        self.state = State::Responding;
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> Engine<crate::sim::SimTarget> {
    Engine::new(crate::sim::SimTarget::new(), Settings::default())
}

#[test]
fn test_unknown_command() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x42]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x42, 0x01, 0x02]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x20]).unwrap(), vec![0xFF]);
    assert!(engine.is_idle());
}

#[test]
fn test_every_unrecognised_id_is_invalid() {
    let mut engine = test_engine();
    for id in 0..=0xFFu8 {
        if Command::try_from(id).is_err() {
            assert_eq!(engine.process(&[id, 0x00]).unwrap(), vec![0xFF], "id 0x{:02X}", id);
        }
    }
}

#[test]
fn test_short_packet_is_invalid() {
    let mut engine = test_engine();
    // DAP_SWO_Baudrate needs four parameter bytes.
    assert_eq!(engine.process(&[0x19, 0x19]).unwrap(), vec![0xFF]);
    // DAP_Info needs its ID byte.
    assert_eq!(engine.process(&[0x00]).unwrap(), vec![0xFF]);
    // Engine recovers for the next packet.
    assert_eq!(engine.process(&[0x03]).unwrap(), vec![0x03, 0x00]);
}

#[test]
fn test_trailing_bytes_are_drained() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x03, 0xAA, 0xBB]).unwrap(), vec![0x03, 0x00]);
    assert_eq!(engine.process(&[0x09, 0x01, 0x02, 0x03, 0x04]).unwrap(), vec![0x09, 0x00]);
}

#[test]
fn test_long_packet_streams_through() {
    let mut engine = test_engine();
    engine.push(RxByte::new(0x12, true, false)).unwrap();
    engine.push(RxByte::new(0x00, false, false)).unwrap();
    for _ in 0..100_000 {
        engine.push(RxByte::new(0xFF, false, false)).unwrap();
        assert!(engine.framer.response().len() <= 2);
    }
    assert!(engine.ready());
    engine.push(RxByte::new(0xFF, false, true)).unwrap();
    let mut response = Vec::new();
    while let Some(tx) = engine.pop() {
        response.push(tx.byte);
    }
    assert_eq!(response, vec![0x12, 0x00]);
    assert_eq!(engine.transactor().swj_bits.len(), 256);
}

#[test]
fn test_backpressure() {
    let mut engine = test_engine();
    engine.push(RxByte::new(0x03, true, true)).unwrap();
    assert!(!engine.ready());
    assert!(matches!(engine.push(RxByte::new(0x03, true, true)), Err(Error::Busy)));

    assert_eq!(engine.pop(), Some(TxByte { byte: 0x03, last: false }));
    assert_eq!(engine.pop(), Some(TxByte { byte: 0x00, last: true }));
    assert_eq!(engine.pop(), None);
    assert!(engine.ready());
    assert!(engine.is_idle());
}

#[test]
fn test_response_waits_for_last_byte() {
    let mut engine = test_engine();
    engine.push(RxByte::new(0x03, true, false)).unwrap();
    assert!(engine.ready());
    assert_eq!(engine.pop(), None);
    engine.push(RxByte::new(0x00, false, true)).unwrap();
    assert_eq!(engine.pop().map(|tx| tx.byte), Some(0x03));
}

#[test]
fn test_stray_and_restarted_packets() {
    let mut engine = test_engine();
    // A byte with no packet start is ignored.
    engine.push(RxByte::new(0x03, false, true)).unwrap();
    assert!(engine.is_idle());
    assert_eq!(engine.pop(), None);

    // A packet which never ends is abandoned when the next one starts.
    engine.push(RxByte::new(0x19, true, false)).unwrap();
    engine.push(RxByte::new(0x01, false, false)).unwrap();
    assert_eq!(engine.process(&[0x03]).unwrap(), vec![0x03, 0x00]);
}

#[test]
fn test_process_empty() {
    let mut engine = test_engine();
    assert!(matches!(engine.process(&[]), Err(Error::EmptyPacket)));
}

#[test]
fn test_execute_commands() {
    let mut engine = test_engine();
    let response = engine.process(&[0x7F, 0x03, 0x00, 0x04, 0x03, 0x0A]).unwrap();
    assert_eq!(response, vec![0x7F, 0x03,
                              0x00, 0x04, 0x31, 0x2E, 0x30, 0x30,
                              0x03, 0x00,
                              0x0A, 0x00, 0x00]);
}

#[test]
fn test_execute_commands_with_streamed_command() {
    let mut engine = test_engine();
    let response = engine.process(&[0x7F, 0x02,
                                    0x12, 0x08, 0xFF,
                                    0x05, 0x00, 0x01, 0x02]).unwrap();
    assert_eq!(response, vec![0x7F, 0x02,
                              0x12, 0x00,
                              0x05, 0x01, 0x01, 0x77, 0x14, 0xA0, 0x2B]);
}

#[test]
fn test_execute_commands_stops_on_unknown() {
    let mut engine = test_engine();
    let response = engine.process(&[0x7F, 0x03, 0x03, 0x42, 0x03]).unwrap();
    assert_eq!(response, vec![0x7F, 0x01, 0x03, 0x00, 0xFF]);
}

#[test]
fn test_execute_commands_bad_sub_id_continues() {
    let mut engine = test_engine();
    let response = engine.process(&[0x7F, 0x02, 0x00, 0x42, 0x03]).unwrap();
    assert_eq!(response, vec![0x7F, 0x02, 0xFF, 0x03, 0x00]);
}

#[test]
fn test_execute_commands_truncated() {
    let mut engine = test_engine();
    // Two commands announced but only one sent.
    assert_eq!(engine.process(&[0x7F, 0x02, 0x03]).unwrap(), vec![0xFF]);
    // Nested fixed command cut short.
    assert_eq!(engine.process(&[0x7F, 0x01, 0x11, 0x00]).unwrap(), vec![0xFF]);
    // Nested sequence cut short reports its own error.
    assert_eq!(engine.process(&[0x7F, 0x01, 0x12, 0x10, 0xFF]).unwrap(),
               vec![0x7F, 0x01, 0x12, 0xFF]);
    // Empty batch.
    assert_eq!(engine.process(&[0x7F, 0x00]).unwrap(), vec![0x7F, 0x00]);
}

#[test]
fn test_queue_commands() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x7E, 0x01, 0x03]).unwrap(), vec![0x7F, 0x01, 0x03, 0x00]);
    // Batches may not nest.
    assert_eq!(engine.process(&[0x7F, 0x01, 0x7F, 0x01, 0x03]).unwrap(),
               vec![0x7F, 0x00, 0xFF]);
}
