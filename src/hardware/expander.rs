//! MCP23017 16-bit I2C GPIO expander driver.
//!
//! The chip has two 8-bit ports. Each port has a direction register
//! (1 = input, 0 = output), an input register and an output latch. The
//! driver keeps its own copy of the output latches; that copy is what pin
//! writes modify and what callers are shown, never a hardware re-read.

use crate::error::{HatError, Result};
use crate::hardware::traits::{OutputLine, RegisterBus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// I2C address with A2..A0 tied to ground.
pub const MCP23017_ADDRESS: u8 = 0x20;

/// BCM pin wired to the expander's active-low RESET input.
pub const RESET_PIN: u8 = 18;

/// How long RESET is held low.
pub const RESET_PULSE: Duration = Duration::from_millis(1);

/// Time the chip needs after RESET is released.
pub const BOOT_DELAY: Duration = Duration::from_millis(10);

/// MCP23017 register addresses (IOCON.BANK = 0, sequential addressing)
pub mod regs {
    pub const IODIRA: u8 = 0x00;
    pub const IODIRB: u8 = 0x01;
    pub const GPIOA: u8 = 0x12;
    pub const GPIOB: u8 = 0x13;
    pub const OLATA: u8 = 0x14;
    pub const OLATB: u8 = 0x15;
}

/// One of the two 8-bit expander ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Port {
    A,
    B,
}

impl FromStr for Port {
    type Err = HatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Port::A),
            "B" => Ok(Port::B),
            _ => Err(HatError::invalid_input("Port must be 'A' or 'B'")),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::A => f.write_str("A"),
            Port::B => f.write_str("B"),
        }
    }
}

/// A byte for each port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortValues {
    #[serde(rename = "A")]
    pub a: u8,
    #[serde(rename = "B")]
    pub b: u8,
}

impl PortValues {
    pub fn new(a: u8, b: u8) -> Self {
        Self { a, b }
    }

    pub fn get(&self, port: Port) -> u8 {
        match port {
            Port::A => self.a,
            Port::B => self.b,
        }
    }

    /// Copy with one bit of one port set or cleared.
    pub fn with_pin(self, port: Port, pin: u8, high: bool) -> Self {
        let mut next = self;
        match port {
            Port::A => next.a = apply_pin(self.a, pin, high),
            Port::B => next.b = apply_pin(self.b, pin, high),
        }
        next
    }

    /// Both ports as 8-character binary strings, MSB first.
    pub fn to_bit_strings(&self) -> PortBits {
        PortBits {
            a: bit_string(self.a),
            b: bit_string(self.b),
        }
    }
}

/// Port values rendered as binary strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBits {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
}

impl Default for PortBits {
    fn default() -> Self {
        PortValues::default().to_bit_strings()
    }
}

/// Set or clear bit `pin` of `value`.
pub fn apply_pin(value: u8, pin: u8, high: bool) -> u8 {
    let mask = 1u8 << (pin & 0x07);
    if high {
        value | mask
    } else {
        value & !mask
    }
}

/// Render a port value as eight binary digits.
pub fn bit_string(value: u8) -> String {
    format!("{:08b}", value)
}

#[derive(Debug, Default)]
struct ExpanderState {
    direction: PortValues,
    latch: PortValues,
    inputs: PortValues,
}

/// MCP23017 driver over a shared register bus.
pub struct ExpanderIO {
    bus: Arc<dyn RegisterBus>,
    address: u8,
    reset: Mutex<Option<Box<dyn OutputLine>>>,
    state: Mutex<ExpanderState>,
}

impl ExpanderIO {
    /// Reset (if a reset line was supplied) and configure the expander.
    ///
    /// Writes both direction registers and zeroes both output latches.
    pub fn initialize(
        bus: Arc<dyn RegisterBus>,
        reset: Option<Box<dyn OutputLine>>,
        direction: PortValues,
    ) -> Result<Self> {
        let expander = Self {
            bus,
            address: MCP23017_ADDRESS,
            reset: Mutex::new(reset),
            state: Mutex::new(ExpanderState::default()),
        };

        expander.pulse_reset();

        expander
            .bus
            .write_register(expander.address, regs::IODIRA, &[direction.a, direction.b])
            .map_err(|e| HatError::setup_error(format!("MCP23017 direction write failed: {}", e)))?;
        expander
            .bus
            .write_register(expander.address, regs::OLATA, &[0x00, 0x00])
            .map_err(|e| HatError::setup_error(format!("MCP23017 latch clear failed: {}", e)))?;

        {
            let mut state = expander.state.lock();
            state.direction = direction;
            state.latch = PortValues::default();
        }

        info!(
            dir_a = %bit_string(direction.a),
            dir_b = %bit_string(direction.b),
            "MCP23017 GPIO initialized"
        );
        Ok(expander)
    }

    // A failed reset is not fatal; the register writes that follow decide.
    fn pulse_reset(&self) {
        let mut reset = self.reset.lock();
        let Some(line) = reset.as_mut() else {
            return;
        };

        let result = line
            .set(false)
            .map(|_| thread::sleep(RESET_PULSE))
            .and_then(|_| line.set(true));

        match result {
            Ok(()) => {
                thread::sleep(BOOT_DELAY);
                info!("MCP23017 hardware reset performed");
            }
            Err(e) => warn!("MCP23017 reset failed: {}", e),
        }
    }

    /// Read both input registers, one bus transaction per port.
    pub fn read_ports(&self) -> Result<PortValues> {
        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        self.bus.read_register(self.address, regs::GPIOA, &mut a)?;
        self.bus.read_register(self.address, regs::GPIOB, &mut b)?;

        let values = PortValues::new(a[0], b[0]);
        self.state.lock().inputs = values;
        Ok(values)
    }

    /// Write both output latches in one transaction.
    ///
    /// The direction mask is not consulted: bits for input pins are stored
    /// and written like any other, exactly as the chip accepts them.
    pub fn write_outputs(&self, latch: PortValues) -> Result<()> {
        let mut state = self.state.lock();
        self.commit(&mut state, latch)
    }

    /// Set or clear one output pin, based on the last commanded latch.
    ///
    /// The read-modify-write and the bus transaction happen under one lock,
    /// so concurrent pin writes never lose each other's bits.
    pub fn write_pin(&self, port: Port, pin: u8, high: bool) -> Result<PortValues> {
        if pin > 7 {
            return Err(HatError::invalid_input("Pin must be between 0 and 7"));
        }

        let mut state = self.state.lock();
        let next = state.latch.with_pin(port, pin, high);
        self.commit(&mut state, next)?;
        debug!(%port, pin, high, "MCP23017 pin written");
        Ok(next)
    }

    fn commit(&self, state: &mut ExpanderState, latch: PortValues) -> Result<()> {
        self.bus
            .write_register(self.address, regs::OLATA, &[latch.a, latch.b])?;
        state.latch = latch;
        Ok(())
    }

    /// Last values written to the output latches.
    pub fn outputs(&self) -> PortValues {
        self.state.lock().latch
    }

    /// Direction masks written at initialization.
    pub fn direction(&self) -> PortValues {
        self.state.lock().direction
    }

    /// Values seen by the most recent `read_ports`.
    pub fn last_inputs(&self) -> PortValues {
        self.state.lock().inputs
    }

    /// Release the reset line, if one was claimed.
    pub fn release(&self) {
        if self.reset.lock().take().is_some() {
            info!("MCP23017 reset pin released");
        }
    }
}
