//! Data structures returned by the hardware facade.

use crate::hardware::expander::{PortBits, PortValues};
use crate::hardware::pins::{PinMode, SAFE_PINS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which subsystems came up at startup. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// MCP23017 GPIO expander
    pub mcp23017: bool,
    /// RS-485 transceiver and listener
    pub rs485: bool,
    /// Raspberry Pi onboard GPIO
    pub rpi_gpio: bool,
}

impl Availability {
    /// Number of subsystems that started.
    pub fn count(&self) -> usize {
        [self.mcp23017, self.rs485, self.rpi_gpio]
            .into_iter()
            .filter(|up| *up)
            .count()
    }
}

/// Onboard GPIO configuration and levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeGpioStatus {
    /// Mode of every configured pin
    pub configs: BTreeMap<u8, PinMode>,
    /// Level (0/1) of every configured pin; `null` if the read failed
    pub states: BTreeMap<u8, Option<u8>>,
    /// Pins that may be configured
    pub safe_pins: Vec<u8>,
}

impl NativeGpioStatus {
    pub(crate) fn new(configs: BTreeMap<u8, PinMode>, states: BTreeMap<u8, Option<bool>>) -> Self {
        Self {
            configs,
            states: states
                .into_iter()
                .map(|(pin, state)| (pin, state.map(u8::from)))
                .collect(),
            safe_pins: SAFE_PINS.to_vec(),
        }
    }
}

/// A complete view of the Top HAT at a point in time.
///
/// Building one never fails: anything that could not be read is reported
/// with its empty or default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HatSnapshot {
    /// RFC 3339 time the snapshot was taken
    pub timestamp: String,
    /// Subsystems that started
    pub hardware_status: Availability,
    /// ADC volts keyed `AIN0`..`AIN3`; empty if the ADC could not be read
    pub adc: BTreeMap<String, f64>,
    /// Expander port levels as 8-character bit strings
    pub gpio: PortBits,
    /// Last values written to the expander latches
    pub outputs: PortValues,
    /// Most recent RS-485 line
    pub rs485_last: Option<String>,
    /// Onboard GPIO state
    pub rpi_gpio: NativeGpioStatus,
}
