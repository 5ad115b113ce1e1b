//! Hardware abstraction traits.
//!
//! The drivers in this crate talk to the board only through these traits, so
//! the same code runs against rppal on a Raspberry Pi and against the
//! in-memory simulated board used by tests.

use crate::error::Result;
use std::sync::Arc;

/// Register-oriented access to a two-wire addressed bus (I2C).
///
/// Every call is one complete transaction: implementations hold the bus for
/// the duration of the call and release it before returning. No retries.
pub trait RegisterBus: Send + Sync {
    /// Write `data` starting at `register` of the device at `address`.
    fn write_register(&self, address: u8, register: u8, data: &[u8]) -> Result<()>;

    /// Fill `buffer` starting at `register` of the device at `address`.
    fn read_register(&self, address: u8, register: u8, buffer: &mut [u8]) -> Result<()>;
}

/// A claimed GPIO line driven by the host. Dropping it releases the line.
pub trait OutputLine: Send {
    /// Drive the line high or low.
    fn set(&mut self, high: bool) -> Result<()>;
}

/// A claimed GPIO line sampled by the host. Dropping it releases the line.
pub trait InputLine: Send {
    /// Sample the current level of the line.
    fn is_high(&mut self) -> Result<bool>;
}

/// Hands out exclusive GPIO lines on the host processor.
pub trait PinDriver: Send + Sync {
    /// Claim `pin` as an output, driven to `initial` immediately.
    fn claim_output(&self, pin: u8, initial: bool) -> Result<Box<dyn OutputLine>>;

    /// Claim `pin` as an input with the pull-down enabled.
    fn claim_input(&self, pin: u8) -> Result<Box<dyn InputLine>>;
}

/// A byte-oriented serial port. Dropping it closes the port.
pub trait SerialPort: Send {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read up to `buffer.len()` bytes, returning how many were read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Queue all of `data` for transmission.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Block until everything queued has left the transmitter.
    fn flush(&mut self) -> Result<()>;
}

/// The environment the supervisor builds its subsystems from.
pub trait Platform {
    /// Open the shared I2C bus.
    fn open_bus(&self) -> Result<Arc<dyn RegisterBus>>;

    /// Open the host GPIO controller.
    fn pin_driver(&self) -> Result<Arc<dyn PinDriver>>;

    /// Open the serial port wired to the RS-485 transceiver.
    fn open_serial(&self) -> Result<Box<dyn SerialPort>>;
}
