//! ADS1015 4-channel 12-bit ADC driver.
//!
//! Conversions are single-shot: each read writes a configuration word that
//! selects the channel and starts a conversion, polls the config register for
//! the conversion-complete bit, then reads the conversion register.

use crate::error::{HatError, Result};
use crate::hardware::bus::{read_word, write_word};
use crate::hardware::traits::RegisterBus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// I2C address of the ADS1015 on the Top HAT (ADDR tied to VDD).
pub const ADS1015_ADDRESS: u8 = 0x49;

/// Number of single-ended input channels.
pub const CHANNEL_COUNT: u8 = 4;

/// Longest time to wait for a conversion before reading anyway.
pub const CONVERSION_TIMEOUT: Duration = Duration::from_millis(50);

const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// ADS1015 register addresses
pub mod regs {
    /// Conversion result
    pub const CONVERSION: u8 = 0x00;
    /// Configuration
    pub const CONFIG: u8 = 0x01;
}

/// Config register bits
mod cfg {
    /// Write: start a conversion. Read: 1 when no conversion is in progress.
    pub const OS: u16 = 1 << 15;
    pub const MUX_SHIFT: u16 = 12;
    pub const PGA_SHIFT: u16 = 9;
    /// Single-shot / power-down mode
    pub const MODE_SINGLE: u16 = 1 << 8;
    pub const DR_SHIFT: u16 = 5;
    /// COMP_QUE = 0b11 disables the comparator
    pub const COMP_DISABLE: u16 = 0b11;
    /// Single-ended AINx vs GND multiplexer codes start at 0b100
    pub const MUX_SINGLE_BASE: u16 = 0b100;
}

/// Programmable gain amplifier setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    /// ±6.144 V
    TwoThirds,
    /// ±4.096 V
    #[default]
    One,
    /// ±2.048 V
    Two,
    /// ±1.024 V
    Four,
    /// ±0.512 V
    Eight,
    /// ±0.256 V
    Sixteen,
}

impl Gain {
    /// All gain settings in code order.
    pub const ALL: [Gain; 6] = [
        Gain::TwoThirds,
        Gain::One,
        Gain::Two,
        Gain::Four,
        Gain::Eight,
        Gain::Sixteen,
    ];

    /// 3-bit PGA code.
    pub fn code(self) -> u16 {
        match self {
            Gain::TwoThirds => 0,
            Gain::One => 1,
            Gain::Two => 2,
            Gain::Four => 3,
            Gain::Eight => 4,
            Gain::Sixteen => 5,
        }
    }

    /// Full-scale input voltage for this gain.
    pub fn full_scale(self) -> f64 {
        match self {
            Gain::TwoThirds => 6.144,
            Gain::One => 4.096,
            Gain::Two => 2.048,
            Gain::Four => 1.024,
            Gain::Eight => 0.512,
            Gain::Sixteen => 0.256,
        }
    }
}

/// Conversion rate in samples per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    Sps128,
    Sps250,
    Sps490,
    Sps920,
    #[default]
    Sps1600,
    Sps2400,
    Sps3300,
}

impl DataRate {
    /// 3-bit DR code.
    pub fn code(self) -> u16 {
        match self {
            DataRate::Sps128 => 0,
            DataRate::Sps250 => 1,
            DataRate::Sps490 => 2,
            DataRate::Sps920 => 3,
            DataRate::Sps1600 => 4,
            DataRate::Sps2400 => 5,
            DataRate::Sps3300 => 6,
        }
    }
}

/// One decoded single-ended conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Input channel 0-3
    pub channel: u8,
    /// Sign-extended 12-bit conversion result
    pub raw: i16,
    /// Input voltage
    pub volts: f64,
}

/// Build the config word that starts a single-shot conversion on `channel`.
pub fn config_word(channel: u8, gain: Gain, rate: DataRate) -> Result<u16> {
    if channel >= CHANNEL_COUNT {
        return Err(HatError::invalid_input(format!(
            "ADC channel must be between 0 and {}, got {}",
            CHANNEL_COUNT - 1,
            channel
        )));
    }

    let mux = cfg::MUX_SINGLE_BASE + u16::from(channel);
    Ok(cfg::OS
        | (mux << cfg::MUX_SHIFT)
        | (gain.code() << cfg::PGA_SHIFT)
        | cfg::MODE_SINGLE
        | (rate.code() << cfg::DR_SHIFT)
        | cfg::COMP_DISABLE)
}

/// Whether a config register read-back reports the conversion as finished.
pub fn conversion_ready(config: u16) -> bool {
    config & cfg::OS != 0
}

/// Decode the conversion register into a signed 12-bit value.
///
/// The result is left-justified; the low 4 bits are padding.
pub fn decode_conversion(word: u16) -> i16 {
    let raw = (word >> 4) & 0x0FFF;
    if raw & 0x0800 != 0 {
        raw as i16 - 0x1000
    } else {
        raw as i16
    }
}

/// Encode a signed 12-bit value the way the ADC presents it.
pub fn encode_conversion(raw12: i16) -> u16 {
    ((raw12 as u16) & 0x0FFF) << 4
}

/// Convert a 12-bit reading to volts for the given gain.
pub fn raw_to_volts(raw12: i16, gain: Gain) -> f64 {
    f64::from(raw12) * gain.full_scale() / 2048.0
}

/// Label used for a channel in snapshot output.
pub fn channel_label(channel: u8) -> String {
    format!("AIN{}", channel)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// ADS1015 driver over a shared register bus.
pub struct AnalogConverter {
    bus: Arc<dyn RegisterBus>,
    address: u8,
    gain: Gain,
    rate: DataRate,
}

impl AnalogConverter {
    /// Create a driver at the default address with default gain and rate.
    pub fn new(bus: Arc<dyn RegisterBus>) -> Self {
        Self {
            bus,
            address: ADS1015_ADDRESS,
            gain: Gain::default(),
            rate: DataRate::default(),
        }
    }

    /// Use a different PGA setting for subsequent conversions.
    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    /// Use a different conversion rate for subsequent conversions.
    pub fn with_rate(mut self, rate: DataRate) -> Self {
        self.rate = rate;
        self
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Run one single-shot conversion on `channel`.
    pub fn read_channel(&self, channel: u8) -> Result<ChannelReading> {
        let word = config_word(channel, self.gain, self.rate)?;
        write_word(&*self.bus, self.address, regs::CONFIG, word)?;

        if !self.wait_for_conversion()? {
            trace!(channel, "ADC conversion wait timed out, reading anyway");
        }

        let raw = decode_conversion(read_word(&*self.bus, self.address, regs::CONVERSION)?);
        Ok(ChannelReading {
            channel,
            raw,
            volts: raw_to_volts(raw, self.gain),
        })
    }

    /// Read channels 0-3 in turn, keyed `AIN0`..`AIN3`, volts rounded to 4 places.
    pub fn read_all_channels(&self) -> Result<BTreeMap<String, f64>> {
        let mut readings = BTreeMap::new();
        for channel in 0..CHANNEL_COUNT {
            let reading = self.read_channel(channel)?;
            readings.insert(channel_label(channel), round4(reading.volts));
        }
        Ok(readings)
    }

    // Returns false if the budget ran out before the ready bit was seen.
    fn wait_for_conversion(&self) -> Result<bool> {
        let started = Instant::now();
        loop {
            let config = read_word(&*self.bus, self.address, regs::CONFIG)?;
            if conversion_ready(config) {
                return Ok(true);
            }
            if started.elapsed() >= CONVERSION_TIMEOUT {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
