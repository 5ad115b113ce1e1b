//! Raspberry Pi onboard GPIO control.
//!
//! Only pins on a fixed allow-list can be configured; the rest are reserved
//! for the I2C bus, the UART, the expander reset line and the RS-485
//! direction line. Each configured pin owns its claimed line until it is
//! reset, at which point the line is released and the record deleted.

use crate::error::{HatError, Result};
use crate::hardware::traits::{InputLine, OutputLine, PinDriver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// BCM pins that are safe to expose.
pub const SAFE_PINS: [u8; 16] = [4, 17, 22, 10, 9, 11, 26, 15, 23, 24, 25, 8, 7, 16, 20, 21];

/// Pins configured as low outputs at startup for the dashboard.
pub const DEFAULT_OUTPUT_PINS: [u8; 3] = [23, 24, 25];

/// Whether `pin` is on the allow-list.
pub fn is_safe_pin(pin: u8) -> bool {
    SAFE_PINS.contains(&pin)
}

/// Direction a pin has been configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    #[serde(rename = "IN")]
    Input,
    #[serde(rename = "OUT")]
    Output,
}

impl FromStr for PinMode {
    type Err = HatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(PinMode::Input),
            "OUT" => Ok(PinMode::Output),
            _ => Err(HatError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Input => f.write_str("IN"),
            PinMode::Output => f.write_str("OUT"),
        }
    }
}

enum Line {
    Input(Box<dyn InputLine>),
    Output(Box<dyn OutputLine>),
}

struct PinRecord {
    line: Line,
    // For outputs: last commanded level. For inputs: last sampled level.
    state: bool,
}

impl PinRecord {
    fn mode(&self) -> PinMode {
        match self.line {
            Line::Input(_) => PinMode::Input,
            Line::Output(_) => PinMode::Output,
        }
    }
}

/// Owns the configured onboard GPIO lines.
pub struct NativePinController {
    driver: Arc<dyn PinDriver>,
    records: Mutex<BTreeMap<u8, PinRecord>>,
}

impl NativePinController {
    /// Create a controller with every pin unconfigured.
    pub fn new(driver: Arc<dyn PinDriver>) -> Self {
        Self {
            driver,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Configure the dashboard's default output pins, driven low.
    pub fn init_default_pins(&self) -> Result<()> {
        for pin in DEFAULT_OUTPUT_PINS {
            self.setup_pin(pin, PinMode::Output)?;
        }
        Ok(())
    }

    /// Configure `pin` as an input (pull-down) or a low output.
    ///
    /// A pin that is already configured is released and claimed again. If
    /// the new claim fails, the previous mode and level are restored.
    pub fn setup_pin(&self, pin: u8, mode: PinMode) -> Result<()> {
        if !is_safe_pin(pin) {
            return Err(HatError::UnsafePin(pin));
        }

        let mut records = self.records.lock();
        // The old line must be dropped before the pin can be claimed again
        let previous = records.remove(&pin).map(|old| (old.mode(), old.state));

        match self.claim(pin, mode, false) {
            Ok(record) => {
                records.insert(pin, record);
                info!(pin, %mode, "Pin configured");
                Ok(())
            }
            Err(e) => {
                if let Some((old_mode, old_state)) = previous {
                    match self.claim(pin, old_mode, old_state) {
                        Ok(record) => {
                            records.insert(pin, record);
                            warn!(pin, %old_mode, "Pin setup failed, previous configuration kept");
                        }
                        Err(restore) => {
                            error!(pin, "Pin setup failed and could not be restored: {}", restore);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn claim(&self, pin: u8, mode: PinMode, level: bool) -> Result<PinRecord> {
        Ok(match mode {
            PinMode::Output => PinRecord {
                line: Line::Output(self.driver.claim_output(pin, level)?),
                state: level,
            },
            PinMode::Input => {
                let mut line = self.driver.claim_input(pin)?;
                let state = line.is_high()?;
                PinRecord {
                    line: Line::Input(line),
                    state,
                }
            }
        })
    }

    /// Drive an output pin high or low.
    pub fn set_output(&self, pin: u8, high: bool) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(&pin).ok_or(HatError::NotConfigured(pin))?;
        let Line::Output(line) = &mut record.line else {
            return Err(HatError::NotConfigured(pin));
        };

        line.set(high)?;
        record.state = high;
        info!(pin, high, "Pin set");
        Ok(())
    }

    /// Current level of a configured pin, `None` if unconfigured.
    ///
    /// Outputs report the last commanded level without touching the
    /// hardware. Inputs are sampled and the cached level updated.
    pub fn get_state(&self, pin: u8) -> Result<Option<bool>> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&pin) else {
            return Ok(None);
        };
        Self::refresh(record).map(Some)
    }

    fn refresh(record: &mut PinRecord) -> Result<bool> {
        if let Line::Input(line) = &mut record.line {
            record.state = line.is_high()?;
        }
        Ok(record.state)
    }

    /// Levels of all configured pins; a failed input read yields `None`.
    pub fn all_states(&self) -> BTreeMap<u8, Option<bool>> {
        let mut records = self.records.lock();
        records
            .iter_mut()
            .map(|(&pin, record)| {
                let state = match Self::refresh(record) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        error!(pin, "Failed to read pin: {}", e);
                        None
                    }
                };
                (pin, state)
            })
            .collect()
    }

    /// Mode of `pin`, `None` if unconfigured.
    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.records.lock().get(&pin).map(PinRecord::mode)
    }

    /// Modes of all configured pins.
    pub fn configs(&self) -> BTreeMap<u8, PinMode> {
        self.records
            .lock()
            .iter()
            .map(|(&pin, record)| (pin, record.mode()))
            .collect()
    }

    /// Release `pin` and forget its configuration.
    ///
    /// Returns whether the pin had been configured.
    pub fn reset_pin(&self, pin: u8) -> Result<bool> {
        if !is_safe_pin(pin) {
            return Err(HatError::UnsafePin(pin));
        }

        let removed = self.records.lock().remove(&pin).is_some();
        if removed {
            info!(pin, "Pin reset to unconfigured state");
        }
        Ok(removed)
    }

    /// Release every configured line.
    pub fn release_all(&self) {
        let released = std::mem::take(&mut *self.records.lock());
        if !released.is_empty() {
            info!(count = released.len(), "Raspberry Pi GPIO lines released");
        }
    }
}
