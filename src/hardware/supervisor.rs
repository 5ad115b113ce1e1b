//! Composition root for the Top HAT hardware.
//!
//! The supervisor brings the subsystems up in a fixed order, remembers which
//! ones made it, and is the only way the rest of the program touches the
//! board. Shutdown releases whatever was acquired, exactly once.

use crate::error::{HatError, Result, Subsystem};
use crate::hardware::adc::AnalogConverter;
use crate::hardware::data::{Availability, HatSnapshot, NativeGpioStatus};
use crate::hardware::expander::{ExpanderIO, Port, PortBits, PortValues, RESET_PIN};
use crate::hardware::pins::{is_safe_pin, NativePinController, PinMode};
use crate::hardware::traits::{PinDriver, Platform, RegisterBus};
use crate::hardware::transceiver::{TransceiverLink, DIRECTION_PIN};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Longest message accepted for RS-485 transmission, in characters.
pub const MAX_MESSAGE_CHARS: usize = 255;

/// Owns every hardware subsystem and exposes the dashboard's operations.
pub struct HardwareSupervisor {
    adc: Option<AnalogConverter>,
    expander: Option<ExpanderIO>,
    transceiver: Option<TransceiverLink>,
    pins: Option<NativePinController>,
    status: Availability,
    shut_down: AtomicBool,
}

impl HardwareSupervisor {
    /// Initialize the expander, the transceiver and the onboard GPIO, in that order.
    ///
    /// A subsystem that fails is logged and left unavailable. Fails only if
    /// none of the three could be started, after releasing anything that was
    /// acquired along the way.
    pub fn start(platform: &dyn Platform) -> Result<Self> {
        let bus = platform
            .open_bus()
            .map_err(|e| warn!("I2C bus unavailable: {}", e))
            .ok();
        let driver = platform
            .pin_driver()
            .map_err(|e| warn!("GPIO controller unavailable: {}", e))
            .ok();

        let expander = match start_expander(bus.clone(), driver.as_ref()) {
            Ok(expander) => Some(expander),
            Err(e) => {
                warn!("MCP23017 initialization failed: {}", e);
                info!("Continuing without MCP23017 support");
                None
            }
        };

        let transceiver = match start_transceiver(platform, driver.as_ref()) {
            Ok(link) => {
                info!("RS-485 handler initialized");
                Some(link)
            }
            Err(e) => {
                warn!("RS-485 initialization failed: {}", e);
                info!("Continuing without RS-485 support");
                None
            }
        };

        let pins = match start_native_pins(driver) {
            Ok(pins) => {
                info!("Raspberry Pi GPIO initialized");
                Some(pins)
            }
            Err(e) => {
                warn!("Raspberry Pi GPIO initialization failed: {}", e);
                None
            }
        };

        let status = Availability {
            mcp23017: expander.is_some(),
            rs485: transceiver.is_some(),
            rpi_gpio: pins.is_some(),
        };
        let supervisor = Self {
            adc: bus.map(AnalogConverter::new),
            expander,
            transceiver,
            pins,
            status,
            shut_down: AtomicBool::new(false),
        };

        info!(
            "Hardware initialization complete: {}/3 components working",
            status.count()
        );
        if status.count() == 0 {
            error!("No hardware components initialized successfully");
            supervisor.shutdown();
            return Err(HatError::Startup(
                "no hardware components initialized successfully".to_string(),
            ));
        }
        Ok(supervisor)
    }

    /// Which subsystems are up.
    pub fn availability(&self) -> Availability {
        self.status
    }

    /// Read everything the dashboard shows. Never fails.
    pub fn snapshot(&self) -> HatSnapshot {
        let adc = match &self.adc {
            Some(adc) => adc.read_all_channels().unwrap_or_else(|e| {
                debug!("ADC read failed: {}", e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        let (gpio, outputs) = match &self.expander {
            Some(expander) => {
                let bits = match expander.read_ports() {
                    Ok(ports) => ports.to_bit_strings(),
                    Err(e) => {
                        debug!("MCP23017 read failed: {}", e);
                        PortBits::default()
                    }
                };
                (bits, expander.outputs())
            }
            None => (PortBits::default(), PortValues::default()),
        };

        HatSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hardware_status: self.status,
            adc,
            gpio,
            outputs,
            rs485_last: self.last_transceiver_message(),
            rpi_gpio: self.native_status(),
        }
    }

    /// Set or clear one expander output pin, returning both latches.
    pub fn set_expander_pin(&self, port: &str, pin: u8, state: u8) -> Result<PortValues> {
        let expander = self
            .expander
            .as_ref()
            .ok_or(HatError::Unavailable(Subsystem::Expander))?;
        let port: Port = port.parse()?;
        let high = parse_level(state)?;

        let outputs = expander.write_pin(port, pin, high)?;
        info!("GPIO {}{} set to {}", port, pin, state);
        Ok(outputs)
    }

    /// Configure an onboard pin as `IN` or `OUT`.
    pub fn setup_native_pin(&self, pin: u8, mode: &str) -> Result<NativeGpioStatus> {
        let pins = self.native_pins()?;
        if !is_safe_pin(pin) {
            return Err(HatError::UnsafePin(pin));
        }
        let mode: PinMode = mode.parse()?;

        pins.setup_pin(pin, mode)?;
        Ok(self.native_status())
    }

    /// Drive an onboard output pin.
    pub fn write_native_pin(&self, pin: u8, state: u8) -> Result<NativeGpioStatus> {
        let pins = self.native_pins()?;
        let high = parse_level(state)?;

        pins.set_output(pin, high)?;
        Ok(self.native_status())
    }

    /// Return an onboard pin to the unconfigured state.
    pub fn reset_native_pin(&self, pin: u8) -> Result<NativeGpioStatus> {
        let pins = self.native_pins()?;
        pins.reset_pin(pin)?;
        Ok(self.native_status())
    }

    /// Transmit a message on the RS-485 bus.
    ///
    /// The message is trimmed before sending. Returns whether the link
    /// reported success.
    pub fn send_transceiver_message(&self, message: &str) -> Result<bool> {
        let link = self
            .transceiver
            .as_ref()
            .ok_or(HatError::Unavailable(Subsystem::Transceiver))?;

        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(HatError::invalid_input("Message cannot be empty"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(HatError::invalid_input(format!(
                "Message too long (max {} chars)",
                MAX_MESSAGE_CHARS
            )));
        }

        Ok(link.send(trimmed))
    }

    /// Most recent line received on RS-485.
    pub fn last_transceiver_message(&self) -> Option<String> {
        self.transceiver.as_ref().and_then(TransceiverLink::last_message)
    }

    /// Onboard GPIO configuration and levels; empty if unavailable.
    pub fn native_status(&self) -> NativeGpioStatus {
        match &self.pins {
            Some(pins) => NativeGpioStatus::new(pins.configs(), pins.all_states()),
            None => NativeGpioStatus::default(),
        }
    }

    fn native_pins(&self) -> Result<&NativePinController> {
        self.pins
            .as_ref()
            .ok_or(HatError::Unavailable(Subsystem::NativeGpio))
    }

    /// Release every hardware resource. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(expander) = &self.expander {
            expander.release();
        }
        if let Some(link) = &self.transceiver {
            link.shutdown();
        }
        if let Some(pins) = &self.pins {
            pins.release_all();
        }
        info!("Hardware cleanup completed");
    }
}

impl Drop for HardwareSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_level(state: u8) -> Result<bool> {
    match state {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(HatError::invalid_input("State must be 0 or 1")),
    }
}

fn start_expander(
    bus: Option<Arc<dyn RegisterBus>>,
    driver: Option<&Arc<dyn PinDriver>>,
) -> Result<ExpanderIO> {
    let bus = bus.ok_or_else(|| HatError::setup_error("I2C bus not open"))?;

    // The reset line is optional; run without it if it cannot be claimed
    let reset = driver.and_then(|driver| match driver.claim_output(RESET_PIN, true) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!("MCP23017 reset pin unavailable, skipping hardware reset: {}", e);
            None
        }
    });

    ExpanderIO::initialize(bus, reset, PortValues::default())
}

fn start_transceiver(
    platform: &dyn Platform,
    driver: Option<&Arc<dyn PinDriver>>,
) -> Result<TransceiverLink> {
    let driver = driver.ok_or_else(|| HatError::gpio_error("GPIO controller not open"))?;
    let port = platform.open_serial()?;
    let direction = driver.claim_output(DIRECTION_PIN, false)?;
    TransceiverLink::start(port, direction)
}

fn start_native_pins(driver: Option<Arc<dyn PinDriver>>) -> Result<NativePinController> {
    let driver = driver.ok_or_else(|| HatError::gpio_error("GPIO controller not open"))?;
    let pins = NativePinController::new(driver);
    if let Err(e) = pins.init_default_pins() {
        pins.release_all();
        return Err(e);
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::adc::ADS1015_ADDRESS;
    use crate::hardware::expander::{regs, MCP23017_ADDRESS};
    use crate::hardware::pins::DEFAULT_OUTPUT_PINS;
    use crate::hardware::sim::SimulatedHat;

    #[test]
    fn test_all_subsystems_start() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        let status = supervisor.availability();
        assert!(status.mcp23017 && status.rs485 && status.rpi_gpio);
        assert!(hat.pins.is_claimed(RESET_PIN));
        assert!(hat.pins.is_claimed(DIRECTION_PIN));
        for pin in DEFAULT_OUTPUT_PINS {
            assert!(hat.pins.is_claimed(pin));
        }
    }

    #[test]
    fn test_zero_subsystems_is_fatal_and_releases_everything() {
        let hat = SimulatedHat::new().without_gpio();
        hat.bus.set_offline(MCP23017_ADDRESS, true);

        let result = HardwareSupervisor::start(&hat);
        assert!(matches!(result, Err(HatError::Startup(_))));
        assert!(hat.serial.sent().is_empty());
        assert!(!hat.pins.is_claimed(RESET_PIN));
    }

    #[test]
    fn test_one_subsystem_is_enough() {
        let hat = SimulatedHat::new().without_bus().without_serial();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();
        assert_eq!(supervisor.availability().count(), 1);

        let snapshot = supervisor.snapshot();
        assert!(snapshot.adc.is_empty());
        assert_eq!(snapshot.gpio, PortBits::default());
        assert_eq!(snapshot.outputs, PortValues::default());
        assert_eq!(snapshot.rs485_last, None);
        assert_eq!(snapshot.rpi_gpio.configs.len(), DEFAULT_OUTPUT_PINS.len());
    }

    #[test]
    fn test_unavailable_subsystems_are_reported() {
        let hat = SimulatedHat::new().without_serial();
        hat.bus.set_offline(MCP23017_ADDRESS, true);
        let supervisor = HardwareSupervisor::start(&hat).unwrap();
        // The failed expander gave its reset line back
        assert!(!hat.pins.is_claimed(RESET_PIN));

        assert!(matches!(
            supervisor.set_expander_pin("A", 0, 1),
            Err(HatError::Unavailable(Subsystem::Expander))
        ));
        assert!(matches!(
            supervisor.send_transceiver_message("hi"),
            Err(HatError::Unavailable(Subsystem::Transceiver))
        ));
        assert_eq!(supervisor.last_transceiver_message(), None);
    }

    #[test]
    fn test_snapshot_degrades_failed_reads() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();
        supervisor.set_expander_pin("b", 4, 1).unwrap();

        hat.bus.set_offline(ADS1015_ADDRESS, true);
        hat.bus.set_offline(MCP23017_ADDRESS, true);
        let snapshot = supervisor.snapshot();

        assert!(snapshot.adc.is_empty());
        assert_eq!(snapshot.gpio, PortBits::default());
        assert_eq!(snapshot.outputs, PortValues::new(0x00, 0x10));
        assert!(snapshot.hardware_status.mcp23017);
    }

    #[test]
    fn test_expander_pin_validation() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        assert!(matches!(supervisor.set_expander_pin("C", 0, 1), Err(HatError::InvalidInput(_))));
        assert!(matches!(supervisor.set_expander_pin("A", 8, 1), Err(HatError::InvalidInput(_))));
        assert!(matches!(supervisor.set_expander_pin("A", 0, 2), Err(HatError::InvalidInput(_))));

        let outputs = supervisor.set_expander_pin("a", 7, 1).unwrap();
        assert_eq!(outputs, PortValues::new(0x80, 0x00));
        assert_eq!(hat.bus.peek(MCP23017_ADDRESS, regs::OLATA), 0x80);
    }

    #[test]
    fn test_native_pin_operations() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        let status = supervisor.setup_native_pin(17, "out").unwrap();
        assert_eq!(status.configs[&17], PinMode::Output);
        assert_eq!(status.states[&17], Some(0));

        let status = supervisor.write_native_pin(17, 1).unwrap();
        assert_eq!(status.states[&17], Some(1));

        let status = supervisor.reset_native_pin(17).unwrap();
        assert!(!status.configs.contains_key(&17));

        assert!(matches!(supervisor.setup_native_pin(2, "OUT"), Err(HatError::UnsafePin(2))));
        assert!(matches!(supervisor.setup_native_pin(17, "PWM"), Err(HatError::InvalidMode(_))));
        assert!(matches!(supervisor.write_native_pin(17, 1), Err(HatError::NotConfigured(17))));
        assert!(matches!(supervisor.write_native_pin(23, 5), Err(HatError::InvalidInput(_))));
    }

    #[test]
    fn test_message_length_limits() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        assert!(matches!(supervisor.send_transceiver_message(""), Err(HatError::InvalidInput(_))));
        assert!(matches!(supervisor.send_transceiver_message("   "), Err(HatError::InvalidInput(_))));
        assert!(matches!(
            supervisor.send_transceiver_message(&"x".repeat(256)),
            Err(HatError::InvalidInput(_))
        ));
        assert!(supervisor.send_transceiver_message(&"x".repeat(255)).unwrap());
    }

    #[test]
    fn test_sent_message_is_trimmed() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        assert!(supervisor.send_transceiver_message("  PING \n").unwrap());
        assert_eq!(hat.serial.sent(), b"PING\n");
    }

    #[test]
    fn test_shutdown_releases_once() {
        let hat = SimulatedHat::new();
        let supervisor = HardwareSupervisor::start(&hat).unwrap();

        supervisor.shutdown();
        assert!(!hat.pins.is_claimed(RESET_PIN));
        assert!(!hat.pins.is_claimed(DIRECTION_PIN));
        assert!(!hat.pins.is_claimed(23));
        assert!(hat.serial.is_closed());

        supervisor.shutdown();
        drop(supervisor);
    }
}
