//! Handlers for commands with a fixed parameter block.
//!
//! Each handler runs once all of its parameter bytes have been collected and
//! writes its complete response, starting with the echoed command ID.

use std::convert::TryFrom;

use crate::command::{
    Command, ConnectPort, DAPInfoID, HostStatusType, ResponseStatus, SwoControl, SwoMode,
    SwoTransport, MAX_FIXED_PARAMS,
};
use crate::config::{clock_divisor, Protocol, WireConfig};
use crate::engine::Engine;
use crate::transactor::{Port, Request, Transaction, Transactor};

/// Longest pin wait accepted by DAP_SWJ_Pins, in microseconds.
const MAX_PIN_WAIT_US: u32 = 3_000_000;

/// Most placeholder trace bytes returned by one DAP_SWO_Data.
const MAX_SWO_DATA: u16 = 100;

/// Placeholder trace byte.
const SWO_FILL: u8 = 0x2A;

/// Request bits DAP_SWO_ExtendedStatus understands.
const SWO_EXTENDED_MASK: u8 = 0x07;

fn u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl<T: Transactor> Engine<T> {
    pub(crate) fn handle(&mut self, command: Command, params: &[u8; MAX_FIXED_PARAMS]) {
        self.framer.write_u8(command.into());
        match command {
            Command::DAP_Info => self.info(params[0]),
            Command::DAP_HostStatus => self.host_status(params[0], params[1]),
            Command::DAP_Connect => self.connect(params[0]),
            Command::DAP_Disconnect => self.disconnect(),
            Command::DAP_TransferConfigure => self.transfer_configure(params),
            Command::DAP_TransferAbort => self.status(ResponseStatus::DAP_OK),
            Command::DAP_WriteABORT => self.write_abort(u32_le(&params[1..5])),
            Command::DAP_Delay => self.delay(u16_le(&params[..2])),
            Command::DAP_ResetTarget => self.reset_target(),
            Command::DAP_SWJ_Pins => self.swj_pins(params[0], params[1], u32_le(&params[2..6])),
            Command::DAP_SWJ_Clock => self.swj_clock(u32_le(&params[..4])),
            Command::DAP_SWD_Configure => self.swd_configure(params[0]),
            Command::DAP_JTAG_Configure => {
                self.config.jtag_devices = params[0];
                self.config.jtag_ir_length = params[1];
                self.status(ResponseStatus::DAP_OK);
            },
            Command::DAP_JTAG_IDCODE => {
                self.status(ResponseStatus::DAP_OK);
                self.framer.write_u32(self.settings.idcode);
            },
            Command::DAP_SWO_Transport => self.swo_transport(params[0]),
            Command::DAP_SWO_Mode => self.swo_mode(params[0]),
            Command::DAP_SWO_Baudrate => {
                let baudrate = u32_le(&params[..4]);
                self.config.swo_baudrate = baudrate;
                self.framer.write_u32(baudrate);
            },
            Command::DAP_SWO_Control => self.swo_control(params[0]),
            Command::DAP_SWO_Status => {
                self.swo_state();
                self.framer.write_u32(self.settings.swo_count);
            },
            Command::DAP_SWO_ExtendedStatus => self.swo_extended_status(params[0]),
            Command::DAP_SWO_Data => self.swo_data(u16_le(&params[..2])),
            _ => {
                log::warn!("No fixed handler for {:?}", command);
                self.framer.invalid_from(self.cmd_start);
            },
        }
    }

    fn status(&mut self, status: ResponseStatus) {
        self.framer.write_u8(status.into());
    }

    fn invalid(&mut self) {
        self.framer.invalid_from(self.cmd_start);
    }

    fn info(&mut self, id: u8) {
        let id = match DAPInfoID::try_from(id) {
            Ok(id) => id,
            Err(_) => {
                log::debug!("Unknown DAP_Info ID 0x{:02X}", id);
                return self.invalid();
            },
        };
        match id {
            DAPInfoID::VendorID | DAPInfoID::ProductID | DAPInfoID::SerialNumber
            | DAPInfoID::TargetVendor | DAPInfoID::TargetName => self.framer.write_u8(0),
            DAPInfoID::FirmwareVersion => {
                let version = self.settings.version.as_bytes();
                self.framer.write_u8(version.len() as u8);
                self.framer.write_slice(version);
            },
            DAPInfoID::Capabilities => {
                self.framer.write_u8(1);
                self.framer.write_u8(self.settings.capabilities);
            },
            DAPInfoID::TestDomainTimer => {
                self.framer.write_u8(4);
                self.framer.write_u32(self.settings.timer_freq);
            },
            DAPInfoID::SWOTraceBufferSize => {
                self.framer.write_u8(4);
                self.framer.write_u32(self.settings.swo_buffer_size);
            },
            DAPInfoID::MaxPacketCount => {
                self.framer.write_u8(1);
                self.framer.write_u8(self.settings.max_packet_count);
            },
            DAPInfoID::MaxPacketSize => {
                self.framer.write_u8(2);
                self.framer.write_u16(self.settings.max_packet_size);
            },
        }
    }

    fn host_status(&mut self, kind: u8, status: u8) {
        let on = status & 1 == 1;
        match HostStatusType::try_from(kind) {
            Ok(HostStatusType::Connect) => self.config.connected = on,
            Ok(HostStatusType::Running) => self.config.running = on,
            Err(_) => return self.invalid(),
        }
        self.status(ResponseStatus::DAP_OK);
    }

    fn connect(&mut self, port: u8) {
        let protocol = match ConnectPort::try_from(port) {
            Ok(ConnectPort::Default) => self.settings.default_port,
            Ok(ConnectPort::SWD) => Protocol::Swd,
            Ok(ConnectPort::JTAG) => Protocol::Jtag,
            Err(_) => Protocol::None,
        };
        if !self.settings.supports(protocol) {
            log::debug!("Connect to unsupported port {} refused", port);
            return self.invalid();
        }
        self.transactor.execute(Request::SetProtocol(protocol));
        self.config.protocol = protocol;
        self.framer.write_u8(protocol.port_id());
    }

    fn disconnect(&mut self) {
        self.config.connected = false;
        self.config.running = false;
        self.config.protocol = Protocol::None;
        self.status(ResponseStatus::DAP_OK);
    }

    fn transfer_configure(&mut self, params: &[u8; MAX_FIXED_PARAMS]) {
        self.config.wire.idle_cycles = params[0];
        self.config.wait_retry = u16_le(&params[1..3]);
        self.config.match_retry = u16_le(&params[3..5]);
        self.transactor.execute(Request::SetConfig(self.config.wire));
        self.status(ResponseStatus::DAP_OK);
    }

    fn write_abort(&mut self, abort: u32) {
        let outcome = self.transactor.execute(Request::Transact(Transaction::write(Port::DP, 0, abort)));
        if outcome.is_ok() {
            self.status(ResponseStatus::DAP_OK);
        } else {
            self.status(ResponseStatus::DAP_ERROR);
        }
    }

    fn delay(&mut self, us: u16) {
        self.transactor.execute(Request::Wait { us: us as u32 });
        self.status(ResponseStatus::DAP_OK);
    }

    fn reset_target(&mut self) {
        self.transactor.execute(Request::Reset);
        self.status(ResponseStatus::DAP_OK);
        // No device-specific reset sequence is implemented.
        self.framer.write_u8(0);
    }

    fn swj_pins(&mut self, output: u8, select: u8, wait_us: u32) {
        let wait_us = wait_us.min(MAX_PIN_WAIT_US);
        let outcome = self.transactor.execute(Request::Pins { output, select, wait_us });
        self.framer.write_u8(outcome.data as u8);
    }

    fn swj_clock(&mut self, rate: u32) {
        match clock_divisor(self.settings.base_clock, rate) {
            Some(divisor) => {
                log::debug!("Setting clock to {} Hz, divisor {}", rate, divisor);
                self.transactor.execute(Request::SetClock { divisor });
                self.config.clock_divisor = divisor;
                self.status(ResponseStatus::DAP_OK);
            },
            None => self.status(ResponseStatus::DAP_ERROR),
        }
    }

    fn swd_configure(&mut self, cfg: u8) {
        self.config.wire = WireConfig {
            turnaround: (cfg & 0b11) + 1,
            data_phase: cfg & 0b100 != 0,
            ..self.config.wire
        };
        self.transactor.execute(Request::SetConfig(self.config.wire));
        self.status(ResponseStatus::DAP_OK);
    }

    fn swo_transport(&mut self, transport: u8) {
        match SwoTransport::try_from(transport) {
            Ok(transport) => {
                self.config.swo_transport = transport.into();
                self.status(ResponseStatus::DAP_OK);
            },
            Err(_) => self.status(ResponseStatus::DAP_ERROR),
        }
    }

    fn swo_mode(&mut self, mode: u8) {
        match SwoMode::try_from(mode) {
            Ok(mode) => {
                self.config.swo_mode = mode.into();
                self.status(ResponseStatus::DAP_OK);
            },
            Err(_) => self.status(ResponseStatus::DAP_ERROR),
        }
    }

    fn swo_control(&mut self, control: u8) {
        match SwoControl::try_from(control) {
            Ok(control) => {
                self.config.swo_active = control == SwoControl::Start;
                self.status(ResponseStatus::DAP_OK);
            },
            Err(_) => self.status(ResponseStatus::DAP_ERROR),
        }
    }

    /// Trace status byte: bit 0 set while capture is active.
    fn swo_state(&mut self) {
        self.framer.write_u8(self.config.swo_active as u8);
    }

    fn swo_extended_status(&mut self, control: u8) {
        if control & !SWO_EXTENDED_MASK != 0 {
            return self.invalid();
        }
        self.swo_state();
        self.framer.write_u32(self.settings.swo_count);
        self.framer.write_u32(self.settings.swo_index);
        self.framer.write_u32(self.settings.swo_timestamp);
    }

    fn swo_data(&mut self, requested: u16) {
        let count = requested.min(MAX_SWO_DATA);
        self.swo_state();
        self.framer.write_u16(count);
        for _ in 0..count {
            self.framer.write_u8(SWO_FILL);
        }
    }
}

#[cfg(test)]
use crate::engine::test_engine;

#[test]
fn test_info() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x00, 0x04]).unwrap(), vec![0x00, 0x04, 0x31, 0x2E, 0x30, 0x30]);
    assert_eq!(engine.process(&[0x00, 0x01]).unwrap(), vec![0x00, 0x00]);
    assert_eq!(engine.process(&[0x00, 0xF0]).unwrap(), vec![0x00, 0x01, 0x01]);
    assert_eq!(engine.process(&[0x00, 0xF1]).unwrap(), vec![0x00, 0x04, 0x00, 0xCA, 0x9A, 0x3B]);
    assert_eq!(engine.process(&[0x00, 0xFD]).unwrap(), vec![0x00, 0x04, 0xE8, 0x03, 0x00, 0x00]);
    assert_eq!(engine.process(&[0x00, 0xFE]).unwrap(), vec![0x00, 0x01, 0x40]);
    assert_eq!(engine.process(&[0x00, 0xFF]).unwrap(), vec![0x00, 0x02, 0x40, 0x00]);
    assert_eq!(engine.process(&[0x00, 0x42]).unwrap(), vec![0xFF]);
}

#[test]
fn test_info_version_after_other_commands() {
    let mut engine = test_engine();
    engine.process(&[0x02, 0x01]).unwrap();
    engine.process(&[0x04, 0x03, 0x11, 0x22, 0x33, 0x44]).unwrap();
    engine.process(&[0x42]).unwrap();
    assert_eq!(engine.process(&[0x00, 0x04]).unwrap(), vec![0x00, 0x04, 0x31, 0x2E, 0x30, 0x30]);
}

#[test]
fn test_host_status() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x01, 0x00, 0x01]).unwrap(), vec![0x01, 0x00]);
    assert!(engine.config().connected);
    assert_eq!(engine.process(&[0x01, 0x01, 0x01]).unwrap(), vec![0x01, 0x00]);
    assert!(engine.config().running);

    let before = engine.config().clone();
    assert_eq!(engine.process(&[0x01, 0x02, 0x00]).unwrap(), vec![0xFF]);
    assert_eq!(engine.config(), &before);

    assert_eq!(engine.process(&[0x01, 0x00, 0x00]).unwrap(), vec![0x01, 0x00]);
    assert!(!engine.config().connected);
}

#[test]
fn test_connect() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x02, 0x01]).unwrap(), vec![0x02, 0x01]);
    assert_eq!(engine.config().protocol, Protocol::Swd);
    assert_eq!(engine.transactor().protocol, Protocol::Swd);
    assert_eq!(engine.process(&[0x02, 0x00]).unwrap(), vec![0x02, 0x01]);
    assert_eq!(engine.process(&[0x02, 0x02]).unwrap(), vec![0xFF]);
    assert_eq!(engine.process(&[0x02, 0x03]).unwrap(), vec![0xFF]);
    assert_eq!(engine.config().protocol, Protocol::Swd);

    assert_eq!(engine.process(&[0x03]).unwrap(), vec![0x03, 0x00]);
    assert_eq!(engine.config().protocol, Protocol::None);
}

#[test]
fn test_connect_jtag() {
    use crate::command::capability;
    use crate::config::Settings;
    use crate::sim::SimTarget;
    let settings = Settings {
        capabilities: capability::SWD | capability::JTAG,
        default_port: Protocol::Jtag,
        ..Settings::default()
    };
    let mut engine = Engine::new(SimTarget::new(), settings);
    assert_eq!(engine.process(&[0x02, 0x00]).unwrap(), vec![0x02, 0x02]);
    assert_eq!(engine.process(&[0x02, 0x02]).unwrap(), vec![0x02, 0x02]);
    assert_eq!(engine.transactor().protocol, Protocol::Jtag);
}

#[test]
fn test_disconnect() {
    let mut engine = test_engine();
    engine.process(&[0x01, 0x00, 0x01]).unwrap();
    engine.process(&[0x01, 0x01, 0x01]).unwrap();
    assert_eq!(engine.process(&[0x03]).unwrap(), vec![0x03, 0x00]);
    assert!(!engine.config().connected);
    assert!(!engine.config().running);
    assert!(engine.transactor().history.is_empty());
}

#[test]
fn test_transfer_configure() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x04, 0x03, 0x11, 0x22, 0x33, 0x44]).unwrap(), vec![0x04, 0x00]);
    assert_eq!(engine.config().wire.idle_cycles, 0x03);
    assert_eq!(engine.config().wait_retry, 0x2211);
    assert_eq!(engine.config().match_retry, 0x4433);
    assert_eq!(engine.transactor().wire.idle_cycles, 0x03);
    assert_eq!(engine.process(&[0x04, 0x03, 0x11, 0x22, 0x33]).unwrap(), vec![0xFF]);
}

#[test]
fn test_write_abort() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x08, 0x00, 0x1E, 0x00, 0x00, 0x00]).unwrap(), vec![0x08, 0x00]);
    assert_eq!(engine.transactor().abort, Some(0x1E));

    engine.transactor_mut().script_ack(crate::transactor::Ack::Fault);
    assert_eq!(engine.process(&[0x08, 0x00, 0x01, 0x02, 0x03, 0x04]).unwrap(), vec![0x08, 0xFF]);
}

#[test]
fn test_delay_and_reset() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x09, 0x01, 0x02, 0x03, 0x04]).unwrap(), vec![0x09, 0x00]);
    assert_eq!(engine.transactor().waited_us, 0x0201);
    assert_eq!(engine.process(&[0x0A]).unwrap(), vec![0x0A, 0x00, 0x00]);
    assert_eq!(engine.transactor().resets, 1);
}

#[test]
fn test_swj_pins() {
    let mut engine = test_engine();
    let response = engine.process(&[0x10, 0x81, 0x81, 0x00, 0x01, 0x02, 0x03]).unwrap();
    assert_eq!(response, vec![0x10, 0x81]);
    assert_eq!(engine.transactor().history.last(),
               Some(&Request::Pins { output: 0x81, select: 0x81, wait_us: MAX_PIN_WAIT_US }));

    // Pins not selected keep their previous level.
    assert_eq!(engine.process(&[0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]).unwrap(), vec![0x10, 0x80]);
}

#[test]
fn test_swj_clock() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x11, 0x40, 0x42, 0x0F, 0x00]).unwrap(), vec![0x11, 0x00]);
    assert_eq!(engine.transactor().divisor, 24);
    assert_eq!(engine.config().clock_divisor, 24);
    assert_eq!(engine.process(&[0x11, 0x00, 0x00, 0x00, 0x00]).unwrap(), vec![0x11, 0xFF]);
    assert_eq!(engine.transactor().divisor, 24);
}

#[test]
fn test_swd_configure() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x13, 0x06]).unwrap(), vec![0x13, 0x00]);
    assert_eq!(engine.config().wire.turnaround, 3);
    assert!(engine.config().wire.data_phase);
    assert_eq!(engine.transactor().wire, engine.config().wire);
}

#[test]
fn test_swo_commands() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x17, 0x00]).unwrap(), vec![0x17, 0x00]);
    assert_eq!(engine.process(&[0x17, 0x02]).unwrap(), vec![0x17, 0x00]);
    assert_eq!(engine.process(&[0x17, 0x03]).unwrap(), vec![0x17, 0xFF]);
    assert_eq!(engine.config().swo_transport, 2);
    assert_eq!(engine.process(&[0x18, 0x01]).unwrap(), vec![0x18, 0x00]);
    assert_eq!(engine.process(&[0x18, 0x03]).unwrap(), vec![0x18, 0xFF]);
    assert_eq!(engine.process(&[0x19, 0x01, 0x02, 0x03, 0x04]).unwrap(),
               vec![0x19, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(engine.config().swo_baudrate, 0x0403_0201);
    assert_eq!(engine.process(&[0x1A, 0x02]).unwrap(), vec![0x1A, 0xFF]);
    assert_eq!(engine.process(&[0x1B]).unwrap(), vec![0x1B, 0x00, 0x44, 0x33, 0x22, 0x11]);
    assert_eq!(engine.process(&[0x1A, 0x01]).unwrap(), vec![0x1A, 0x00]);
    assert_eq!(engine.process(&[0x1B]).unwrap(), vec![0x1B, 0x01, 0x44, 0x33, 0x22, 0x11]);
    assert_eq!(engine.process(&[0x1A, 0x00]).unwrap(), vec![0x1A, 0x00]);
}

#[test]
fn test_swo_extended_status() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x1E, 0x07]).unwrap(),
               vec![0x1E, 0x00, 0x44, 0x33, 0x22, 0x11, 0x88, 0x77, 0x66, 0x55,
                    0xCC, 0xBB, 0xAA, 0x99]);
    assert_eq!(engine.process(&[0x1E, 0x08]).unwrap(), vec![0xFF]);
}

#[test]
fn test_swo_data() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x1C, 0x04, 0x00]).unwrap(),
               vec![0x1C, 0x00, 0x04, 0x00, 0x2A, 0x2A, 0x2A, 0x2A]);
    assert_eq!(engine.process(&[0x1C, 0x00, 0x00]).unwrap(), vec![0x1C, 0x00, 0x00, 0x00]);

    let response = engine.process(&[0x1C, 0x65, 0x00]).unwrap();
    assert_eq!(&response[..4], &[0x1C, 0x00, 0x64, 0x00]);
    assert_eq!(response.len(), 4 + 100);
}

#[test]
fn test_jtag_configure_and_idcode() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x15, 0x03, 0x10]).unwrap(), vec![0x15, 0x00]);
    assert_eq!(engine.config().jtag_devices, 3);
    assert_eq!(engine.config().jtag_ir_length, 0x10);
    assert_eq!(engine.process(&[0x16, 0x00]).unwrap(), vec![0x16, 0x00, 0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn test_transfer_abort() {
    let mut engine = test_engine();
    assert_eq!(engine.process(&[0x07]).unwrap(), vec![0x07, 0x00]);
}
