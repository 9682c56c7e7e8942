// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! dapengine
//!
//! CMSIS-DAP command processing engine for debug probe firmware.
//!
//! Bytes from the host transport are pushed into an [`Engine`] one at a time.
//! The engine decodes each command, performs any debug-port operations through
//! a [`Transactor`], and builds the response for the transport to drain.

#[macro_use]
pub mod bitvec;

pub mod command;
pub mod config;
pub mod transactor;
pub mod scratch;
pub mod framer;
pub mod sequence;
pub mod transfer;
pub mod handlers;
pub mod engine;
pub mod sim;

pub use command::{Command, DAPInfoID, DAP_INVALID};
pub use config::{Settings, ProbeConfig, Protocol, WireConfig};
pub use engine::{Engine, Error, Result};
pub use framer::{RxByte, TxByte};
pub use transactor::{Ack, Outcome, Request, Transaction, Transactor, Handshake, Polled};
pub use transfer::TransferRequest;
pub use sim::SimTarget;
