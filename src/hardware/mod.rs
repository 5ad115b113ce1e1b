//! Top HAT hardware resource layer.
//!
//! Drivers for the ADS1015 ADC and the MCP23017 GPIO expander sit on a shared
//! I2C [`RegisterBus`]; the RS-485 transceiver and the onboard pins use lines
//! from a [`PinDriver`]. The [`HardwareSupervisor`] builds all of them from a
//! [`Platform`], either the real Raspberry Pi or the in-memory
//! [`SimulatedHat`].

pub mod adc;
pub mod bus;
pub mod data;
pub mod expander;
pub mod pins;
pub mod rpi;
pub mod sim;
pub mod supervisor;
pub mod traits;
pub mod transceiver;

// Re-export commonly used items
pub use adc::{AnalogConverter, ChannelReading, DataRate, Gain};
pub use data::{Availability, HatSnapshot, NativeGpioStatus};
pub use expander::{ExpanderIO, Port, PortBits, PortValues};
pub use pins::{NativePinController, PinMode, SAFE_PINS};
pub use rpi::RaspberryPi;
pub use sim::SimulatedHat;
pub use supervisor::HardwareSupervisor;
pub use traits::{InputLine, OutputLine, PinDriver, Platform, RegisterBus, SerialPort};
pub use transceiver::{LineAssembler, MessageCell, TransceiverLink};
