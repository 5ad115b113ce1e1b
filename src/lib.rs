//! # Top HAT Dashboard
//!
//! Hardware control and a web dashboard for the Raspberry Pi "Top HAT"
//! expansion board: an ADS1015 ADC, an MCP23017 GPIO expander, an RS-485
//! half-duplex link, onboard GPIO pins and USB enumeration.
//!
//! ## Features
//!
//! - **Register-level drivers** for the ADC and the expander over a shared I2C bus
//! - **RS-485 transceiver** with a background receive thread and direction control
//! - **Allow-listed onboard GPIO** with per-pin mode and state tracking
//! - **Graceful degradation**: each subsystem may fail at startup independently
//! - **Simulated board** for development and tests off the Pi
//! - **Library + Binary**: use as a crate or run the `tophat` dashboard
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tophat_dashboard::{start_web_server, HardwareSupervisor, SimulatedHat, WebConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hat = Arc::new(HardwareSupervisor::start(&SimulatedHat::demo())?);
//!     println!("{:?}", hat.snapshot().adc);
//!
//!     start_web_server(WebConfig::default(), hat).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod hardware;
pub mod usb;
pub mod web;

// Re-export public API
pub use error::{HatError, Result, Subsystem};
pub use hardware::{
    Availability, HardwareSupervisor, HatSnapshot, NativeGpioStatus, PinMode, Platform,
    PortValues, RaspberryPi, SimulatedHat,
};
pub use usb::{UsbDevice, UsbMonitor};
pub use web::{create_app, shutdown_signal, start_web_server, AppState, WebConfig};

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 5000;
