//! CMSIS-DAP command identifiers and the static per-command parameter table.
//!
//! The command byte is the only thing the engine knows about a packet when it
//! arrives, so everything needed to decide how many more bytes to collect is
//! derived from it here.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Response byte used for any unknown command or malformed packet.
pub const DAP_INVALID: u8 = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[allow(non_camel_case_types)]
#[repr(u8)]
pub enum Command {
    DAP_Info                = 0x00,
    DAP_HostStatus          = 0x01,
    DAP_Connect             = 0x02,
    DAP_Disconnect          = 0x03,
    DAP_TransferConfigure   = 0x04,
    DAP_Transfer            = 0x05,
    DAP_TransferBlock       = 0x06,
    DAP_TransferAbort       = 0x07,
    DAP_WriteABORT          = 0x08,
    DAP_Delay               = 0x09,
    DAP_ResetTarget         = 0x0A,
    DAP_SWJ_Pins            = 0x10,
    DAP_SWJ_Clock           = 0x11,
    DAP_SWJ_Sequence        = 0x12,
    DAP_SWD_Configure       = 0x13,
    DAP_JTAG_Sequence       = 0x14,
    DAP_JTAG_Configure      = 0x15,
    DAP_JTAG_IDCODE         = 0x16,
    DAP_SWO_Transport       = 0x17,
    DAP_SWO_Mode            = 0x18,
    DAP_SWO_Baudrate        = 0x19,
    DAP_SWO_Control         = 0x1A,
    DAP_SWO_Status          = 0x1B,
    DAP_SWO_Data            = 0x1C,
    DAP_SWD_Sequence        = 0x1D,
    DAP_SWO_ExtendedStatus  = 0x1E,
    DAP_QueueCommands       = 0x7E,
    DAP_ExecuteCommands     = 0x7F,
}

/// How a command's parameters arrive after its ID byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Params {
    /// Exactly this many bytes are collected before the handler runs.
    Fixed(usize),
    /// The command's own sub-engine consumes bytes as they arrive.
    Streamed,
}

impl Command {
    /// Parameter layout for this command, not counting the ID byte.
    pub fn params(self) -> Params {
        use Command::*;
        match self {
            DAP_Disconnect | DAP_ResetTarget | DAP_SWO_Status | DAP_TransferAbort
                => Params::Fixed(0),
            DAP_Info | DAP_Connect | DAP_SWD_Configure | DAP_SWO_Transport | DAP_SWO_Mode
            | DAP_SWO_Control | DAP_SWO_ExtendedStatus | DAP_JTAG_IDCODE
                => Params::Fixed(1),
            DAP_HostStatus | DAP_SWO_Data | DAP_JTAG_Configure | DAP_Delay
                => Params::Fixed(2),
            DAP_SWJ_Clock | DAP_SWO_Baudrate
                => Params::Fixed(4),
            DAP_WriteABORT | DAP_TransferConfigure
                => Params::Fixed(5),
            DAP_SWJ_Pins
                => Params::Fixed(6),
            DAP_SWJ_Sequence | DAP_SWD_Sequence | DAP_JTAG_Sequence | DAP_Transfer
            | DAP_TransferBlock | DAP_ExecuteCommands | DAP_QueueCommands
                => Params::Streamed,
        }
    }

    /// Whether this command wraps other commands.
    pub fn is_batch(self) -> bool {
        matches!(self, Command::DAP_ExecuteCommands | Command::DAP_QueueCommands)
    }
}

/// Largest fixed parameter block, used to size the framer's rx buffer.
pub const MAX_FIXED_PARAMS: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[allow(non_camel_case_types)]
#[repr(u8)]
pub enum ResponseStatus {
    DAP_OK                  = 0x00,
    DAP_ERROR               = 0xFF,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DAPInfoID {
    VendorID                = 0x01,
    ProductID               = 0x02,
    SerialNumber            = 0x03,
    FirmwareVersion         = 0x04,
    TargetVendor            = 0x05,
    TargetName              = 0x06,
    Capabilities            = 0xF0,
    TestDomainTimer         = 0xF1,
    SWOTraceBufferSize      = 0xFD,
    MaxPacketCount          = 0xFE,
    MaxPacketSize           = 0xFF,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HostStatusType {
    Connect                 = 0,
    Running                 = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConnectPort {
    Default                 = 0,
    SWD                     = 1,
    JTAG                    = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SwoTransport {
    None                    = 0,
    DAPCommand              = 1,
    USBEndpoint             = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SwoMode {
    Off                     = 0,
    UART                    = 1,
    Manchester              = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SwoControl {
    Stop                    = 0,
    Start                   = 1,
}

/// Capability bits reported by DAP_Info.
pub mod capability {
    pub const SWD: u8               = 1 << 0;
    pub const JTAG: u8              = 1 << 1;
    pub const SWO_UART: u8          = 1 << 2;
    pub const SWO_MANCHESTER: u8    = 1 << 3;
    pub const ATOMIC: u8            = 1 << 4;
    pub const TEST_DOMAIN_TIMER: u8 = 1 << 5;
}

#[test]
fn test_param_table() {
    use std::convert::TryFrom;
    assert_eq!(Command::DAP_Disconnect.params(), Params::Fixed(0));
    assert_eq!(Command::DAP_Info.params(), Params::Fixed(1));
    assert_eq!(Command::DAP_HostStatus.params(), Params::Fixed(2));
    assert_eq!(Command::DAP_SWJ_Clock.params(), Params::Fixed(4));
    assert_eq!(Command::DAP_TransferConfigure.params(), Params::Fixed(5));
    assert_eq!(Command::DAP_SWJ_Pins.params(), Params::Fixed(MAX_FIXED_PARAMS));
    assert_eq!(Command::DAP_Transfer.params(), Params::Streamed);
    assert!(Command::try_from(0x42).is_err());
    assert!(Command::try_from(0x7F).unwrap().is_batch());
}
