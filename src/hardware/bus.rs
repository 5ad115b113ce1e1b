//! Register access helpers and the Linux I2C bus implementation.

use crate::error::Result;
use crate::hardware::traits::RegisterBus;

/// I2C bus number the Top HAT is wired to (`/dev/i2c-1`).
pub const I2C_BUS_NUM: u8 = 1;

/// Write a 16-bit register value, most significant byte first.
pub fn write_word(bus: &dyn RegisterBus, address: u8, register: u8, value: u16) -> Result<()> {
    bus.write_register(address, register, &value.to_be_bytes())
}

/// Read a 16-bit register value, most significant byte first.
pub fn read_word(bus: &dyn RegisterBus, address: u8, register: u8) -> Result<u16> {
    let mut buf = [0u8; 2];
    bus.read_register(address, register, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a single 8-bit register.
pub fn read_byte(bus: &dyn RegisterBus, address: u8, register: u8) -> Result<u8> {
    let mut buf = [0u8; 1];
    bus.read_register(address, register, &mut buf)?;
    Ok(buf[0])
}

#[cfg(feature = "hardware")]
mod linux {
    use super::*;
    use crate::error::HatError;
    use parking_lot::Mutex;
    use rppal::i2c::I2c;

    struct BusState {
        i2c: I2c,
        // Slave address currently programmed into the adapter
        current: Option<u8>,
    }

    /// I2C bus backed by rppal's `/dev/i2c-N` driver.
    ///
    /// The mutex is held from slave selection until the transfer completes,
    /// so the ADC and the expander never interleave mid-transaction.
    pub struct LinuxI2cBus {
        state: Mutex<BusState>,
    }

    impl LinuxI2cBus {
        /// Open the given I2C bus.
        pub fn open(bus: u8) -> Result<Self> {
            let i2c = I2c::with_bus(bus)
                .map_err(|e| HatError::config_error(format!("Failed to open I2C bus {}: {}", bus, e)))?;

            Ok(Self {
                state: Mutex::new(BusState { i2c, current: None }),
            })
        }

        fn select(state: &mut BusState, address: u8) -> Result<()> {
            if state.current != Some(address) {
                state
                    .i2c
                    .set_slave_address(u16::from(address))
                    .map_err(|e| HatError::bus_error(address, e.to_string()))?;
                state.current = Some(address);
            }
            Ok(())
        }
    }

    impl RegisterBus for LinuxI2cBus {
        fn write_register(&self, address: u8, register: u8, data: &[u8]) -> Result<()> {
            let mut state = self.state.lock();
            Self::select(&mut state, address)?;
            state
                .i2c
                .block_write(register, data)
                .map_err(|e| HatError::bus_error(address, e.to_string()))
        }

        fn read_register(&self, address: u8, register: u8, buffer: &mut [u8]) -> Result<()> {
            let mut state = self.state.lock();
            Self::select(&mut state, address)?;
            state
                .i2c
                .block_read(register, buffer)
                .map_err(|e| HatError::bus_error(address, e.to_string()))
        }
    }
}

#[cfg(feature = "hardware")]
pub use linux::LinuxI2cBus;
