//! Error handling for the Top HAT dashboard crate.

use std::fmt;

/// A specialized `Result` type for Top HAT operations.
pub type Result<T> = std::result::Result<T, HatError>;

/// The independently-failable hardware subsystems on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// MCP23017 16-bit GPIO expander
    Expander,
    /// RS-485 half-duplex transceiver
    Transceiver,
    /// Raspberry Pi onboard GPIO lines
    NativeGpio,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Expander => "MCP23017",
            Subsystem::Transceiver => "RS-485",
            Subsystem::NativeGpio => "Raspberry Pi GPIO",
        };
        f.write_str(name)
    }
}

/// The main error type for Top HAT operations.
#[derive(Debug, thiserror::Error)]
pub enum HatError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I2C transaction failed (no ACK, arbitration lost, timeout)
    #[error("I2C bus error at address 0x{address:02x}: {message}")]
    Bus { address: u8, message: String },

    /// A device did not accept its initial configuration
    #[error("Device setup failed: {0}")]
    Setup(String),

    /// Claiming or driving a GPIO line failed
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Serial port failure
    #[error("Serial transport error: {0}")]
    Transport(String),

    /// Pin is outside the allow-list
    #[error("Pin {0} is not safe to use")]
    UnsafePin(u8),

    /// Pin is not configured for the requested operation
    #[error("Pin {0} is not configured as output")]
    NotConfigured(u8),

    /// Unknown pin mode string
    #[error("Mode must be 'IN' or 'OUT', got '{0}'")]
    InvalidMode(String),

    /// Caller supplied an out-of-range or malformed value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Subsystem did not come up at startup
    #[error("{0} not available")]
    Unavailable(Subsystem),

    /// No subsystem could be initialized
    #[error("Hardware initialization failed: {0}")]
    Startup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),
}

impl HatError {
    /// Create a new I2C bus error for the device at `address`
    pub fn bus_error(address: u8, msg: impl Into<String>) -> Self {
        Self::Bus {
            address,
            message: msg.into(),
        }
    }

    /// Create a new device setup error
    pub fn setup_error(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Create a new GPIO error
    pub fn gpio_error(msg: impl Into<String>) -> Self {
        Self::Gpio(msg.into())
    }

    /// Create a new serial transport error
    pub fn transport_error(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Whether this error was caused by the caller rather than the hardware.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnsafePin(_) | Self::NotConfigured(_) | Self::InvalidMode(_) | Self::InvalidInput(_)
        )
    }
}
