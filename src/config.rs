//! Probe identity and configuration state.
//!
//! `Settings` describes what the probe is and never changes while an engine is
//! running. `ProbeConfig` is the state the host modifies through configuration
//! commands; it is owned by the engine and handed to handlers by reference.

use crate::command::capability;

/// Default base clock feeding the debug-port clock divider.
pub const DEFAULT_BASE_CLOCK: u32 = 48_000_000;

/// Divider value the debug port starts with before any DAP_SWJ_Clock.
pub const DEFAULT_CLOCK_DIVISOR: u16 = 32;

/// Largest divider the debug port accepts (11 bits).
pub const MAX_CLOCK_DIVISOR: u16 = 0x7FF;

/// Static description of the probe.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Firmware version string returned for DAP_Info 0x04.
    pub version: &'static str,
    /// Capability byte returned for DAP_Info 0xF0.
    pub capabilities: u8,
    /// Protocol used when the host connects with the default port.
    pub default_port: Protocol,
    pub timer_freq: u32,
    pub swo_buffer_size: u32,
    pub max_packet_count: u8,
    pub max_packet_size: u16,
    /// Frequency of the clock the debug-port divider is applied to.
    pub base_clock: u32,
    /// IDCODE returned by DAP_JTAG_IDCODE.
    pub idcode: u32,
    pub swo_count: u32,
    pub swo_index: u32,
    pub swo_timestamp: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            version: "1.00",
            capabilities: capability::SWD,
            default_port: Protocol::Swd,
            timer_freq: 0x3B9A_CA00,
            swo_buffer_size: 1000,
            max_packet_count: 64,
            max_packet_size: 64,
            base_clock: DEFAULT_BASE_CLOCK,
            idcode: 0x4433_2211,
            swo_count: 0x1122_3344,
            swo_index: 0x5566_7788,
            swo_timestamp: 0x99AA_BBCC,
        }
    }
}

impl Settings {
    /// True if the capability byte enables `protocol`.
    pub fn supports(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Swd => self.capabilities & capability::SWD != 0,
            Protocol::Jtag => self.capabilities & capability::JTAG != 0,
            Protocol::None => false,
        }
    }

    /// Number of read results one Transfer or TransferBlock response can carry.
    ///
    /// A TransferBlock response has a four byte header ahead of its data.
    pub fn scratch_words(&self) -> usize {
        ((self.max_packet_size as usize).saturating_sub(4) / 4).max(1)
    }
}

/// Wire protocol selected by DAP_Connect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    None,
    Swd,
    Jtag,
}

impl Protocol {
    /// Port ID as reported in the DAP_Connect response.
    pub fn port_id(self) -> u8 {
        match self {
            Protocol::None => 0,
            Protocol::Swd => 1,
            Protocol::Jtag => 2,
        }
    }
}

/// SWD line configuration, plus the idle cycles inserted after each transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WireConfig {
    /// Turnaround period in clock cycles (1 to 4).
    pub turnaround: u8,
    /// Always generate a data phase, even on WAIT/FAULT.
    pub data_phase: bool,
    pub idle_cycles: u8,
}

impl Default for WireConfig {
    fn default() -> Self {
        WireConfig { turnaround: 1, data_phase: false, idle_cycles: 0 }
    }
}

/// Mutable probe configuration, changed only by configuration commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    pub connected: bool,
    pub running: bool,
    pub protocol: Protocol,
    pub wire: WireConfig,
    pub wait_retry: u16,
    pub match_retry: u16,
    /// Mask applied to reads before comparing against a match value.
    pub match_mask: u32,
    pub clock_divisor: u16,
    pub jtag_devices: u8,
    pub jtag_ir_length: u8,
    pub swo_transport: u8,
    pub swo_mode: u8,
    pub swo_baudrate: u32,
    pub swo_active: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            connected: false,
            running: false,
            protocol: Protocol::None,
            wire: WireConfig::default(),
            wait_retry: 100,
            match_retry: 0,
            match_mask: 0xFFFF_FFFF,
            clock_divisor: DEFAULT_CLOCK_DIVISOR,
            jtag_devices: 0,
            jtag_ir_length: 0,
            swo_transport: 0,
            swo_mode: 0,
            swo_baudrate: 0,
            swo_active: false,
        }
    }
}

/// Compute the debug-port divider for a requested clock rate.
///
/// The port toggles the clock once per divider period, so a full cycle takes
/// two periods. Returns None for a rate of 0.
pub fn clock_divisor(base_clock: u32, rate: u32) -> Option<u16> {
    if rate == 0 {
        return None;
    }
    let period = 2 * rate as u64;
    let divisor = (base_clock as u64 + period - 1) / period;
    Some(divisor.max(1).min(MAX_CLOCK_DIVISOR as u64) as u16)
}

#[test]
fn test_clock_divisor() {
    assert_eq!(clock_divisor(48_000_000, 0), None);
    assert_eq!(clock_divisor(48_000_000, 1_000_000), Some(24));
    assert_eq!(clock_divisor(48_000_000, 700_000), Some(35));
    assert_eq!(clock_divisor(48_000_000, 100_000_000), Some(1));
    assert_eq!(clock_divisor(48_000_000, 100), Some(MAX_CLOCK_DIVISOR));
}

#[test]
fn test_supports() {
    let settings = Settings::default();
    assert!(settings.supports(Protocol::Swd));
    assert!(!settings.supports(Protocol::Jtag));
    let settings = Settings { capabilities: capability::JTAG, ..Settings::default() };
    assert!(!settings.supports(Protocol::Swd));
    assert!(settings.supports(Protocol::Jtag));
}

#[test]
fn test_scratch_words() {
    assert_eq!(Settings::default().scratch_words(), 15);
    assert_eq!(Settings { max_packet_size: 12, ..Settings::default() }.scratch_words(), 2);
    assert_eq!(Settings { max_packet_size: 1024, ..Settings::default() }.scratch_words(), 255);
    assert_eq!(Settings { max_packet_size: 0, ..Settings::default() }.scratch_words(), 1);
}
