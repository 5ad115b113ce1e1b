//! The real Raspberry Pi platform.
//!
//! Feature-gated so the crate builds and tests on machines without the
//! Pi's peripherals. Without the `hardware` feature every device reports
//! itself as unavailable.

use crate::error::Result;
use crate::hardware::traits::{PinDriver, Platform, RegisterBus, SerialPort};
use std::sync::Arc;

/// Raspberry Pi with a Top HAT attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct RaspberryPi;

impl RaspberryPi {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "hardware")]
mod rppal_backend {
    use super::*;
    use crate::error::HatError;
    use crate::hardware::bus::{LinuxI2cBus, I2C_BUS_NUM};
    use crate::hardware::traits::{InputLine, OutputLine};
    use crate::hardware::transceiver::{BAUD_RATE, SERIAL_PATH};
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use rppal::uart::{Parity, Uart};
    use std::time::Duration;

    /// GPIO lines claimed through rppal. Dropping a pin restores its mode.
    pub struct RppalPins {
        gpio: Gpio,
    }

    impl RppalPins {
        pub fn new() -> Result<Self> {
            let gpio = Gpio::new()
                .map_err(|e| HatError::gpio_error(format!("Failed to initialize GPIO: {}", e)))?;
            Ok(Self { gpio })
        }
    }

    struct RppalOutput(OutputPin);

    impl OutputLine for RppalOutput {
        fn set(&mut self, high: bool) -> Result<()> {
            if high {
                self.0.set_high();
            } else {
                self.0.set_low();
            }
            Ok(())
        }
    }

    struct RppalInput(InputPin);

    impl InputLine for RppalInput {
        fn is_high(&mut self) -> Result<bool> {
            Ok(self.0.is_high())
        }
    }

    impl PinDriver for RppalPins {
        fn claim_output(&self, pin: u8, initial: bool) -> Result<Box<dyn OutputLine>> {
            let pin = self
                .gpio
                .get(pin)
                .map_err(|e| HatError::gpio_error(format!("Failed to claim pin {}: {}", pin, e)))?;
            let line = if initial {
                pin.into_output_high()
            } else {
                pin.into_output_low()
            };
            Ok(Box::new(RppalOutput(line)))
        }

        fn claim_input(&self, pin: u8) -> Result<Box<dyn InputLine>> {
            let pin = self
                .gpio
                .get(pin)
                .map_err(|e| HatError::gpio_error(format!("Failed to claim pin {}: {}", pin, e)))?;
            Ok(Box::new(RppalInput(pin.into_input_pulldown())))
        }
    }

    /// The PL011/mini-UART behind `/dev/serial0`, in non-blocking read mode.
    pub struct RppalSerial {
        uart: Uart,
    }

    impl RppalSerial {
        pub fn open() -> Result<Self> {
            let mut uart = Uart::with_path(SERIAL_PATH, BAUD_RATE, Parity::None, 8, 1)
                .map_err(|e| HatError::transport_error(format!("Failed to open {}: {}", SERIAL_PATH, e)))?;
            uart.set_read_mode(0, Duration::ZERO)
                .map_err(|e| HatError::transport_error(e.to_string()))?;
            Ok(Self { uart })
        }
    }

    impl SerialPort for RppalSerial {
        fn bytes_available(&mut self) -> Result<usize> {
            self.uart
                .input_len()
                .map_err(|e| HatError::transport_error(e.to_string()))
        }

        fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
            self.uart
                .read(buffer)
                .map_err(|e| HatError::transport_error(e.to_string()))
        }

        fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
            while !data.is_empty() {
                let written = self
                    .uart
                    .write(data)
                    .map_err(|e| HatError::transport_error(e.to_string()))?;
                if written == 0 {
                    return Err(HatError::transport_error("serial port accepted no data"));
                }
                data = &data[written..];
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.uart
                .drain()
                .map_err(|e| HatError::transport_error(e.to_string()))
        }
    }

    impl Platform for RaspberryPi {
        fn open_bus(&self) -> Result<Arc<dyn RegisterBus>> {
            Ok(Arc::new(LinuxI2cBus::open(I2C_BUS_NUM)?))
        }

        fn pin_driver(&self) -> Result<Arc<dyn PinDriver>> {
            Ok(Arc::new(RppalPins::new()?))
        }

        fn open_serial(&self) -> Result<Box<dyn SerialPort>> {
            Ok(Box::new(RppalSerial::open()?))
        }
    }
}

#[cfg(not(feature = "hardware"))]
mod unsupported {
    use super::*;
    use crate::error::HatError;

    const MESSAGE: &str = "built without the `hardware` feature";

    impl Platform for RaspberryPi {
        fn open_bus(&self) -> Result<Arc<dyn RegisterBus>> {
            Err(HatError::config_error(format!("I2C bus unavailable: {}", MESSAGE)))
        }

        fn pin_driver(&self) -> Result<Arc<dyn PinDriver>> {
            Err(HatError::config_error(format!("GPIO unavailable: {}", MESSAGE)))
        }

        fn open_serial(&self) -> Result<Box<dyn SerialPort>> {
            Err(HatError::config_error(format!("serial port unavailable: {}", MESSAGE)))
        }
    }
}
