use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tophat_dashboard::{
    hardware::{
        adc::{self, Gain},
        expander::{regs, ExpanderIO, Port, MCP23017_ADDRESS},
        pins::{is_safe_pin, SAFE_PINS},
        sim::{SimulatedBus, SimulatedPins},
        transceiver::DIRECTION_PIN,
    },
    HardwareSupervisor, HatError, PinMode, PortValues, SimulatedHat, Subsystem, WebConfig,
};

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Test voltage decoding for every gain and a spread of conversion words
#[test]
fn test_adc_decoding_matches_formula() {
    for gain in Gain::ALL {
        for word in (0..=u16::MAX).step_by(97) {
            let raw = ((word >> 4) & 0x0FFF) as i16;
            let signed = if raw >= 0x800 { raw - 0x1000 } else { raw };
            let expected = f64::from(signed) * gain.full_scale() / 2048.0;

            let decoded = adc::decode_conversion(word);
            assert_eq!(decoded, signed);
            assert_eq!(adc::raw_to_volts(decoded, gain), expected);
        }
    }
}

/// Test that encoding a 12-bit value and decoding it returns the same value
#[test]
fn test_adc_encoding_round_trip() {
    for raw in [-2048i16, -1, 0, 1, 1234, 2047] {
        assert_eq!(adc::decode_conversion(adc::encode_conversion(raw)), raw);
    }
}

/// Test that the output latch is the in-order accumulation of pin writes
#[test]
fn test_latch_accumulates_in_call_order() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    let writes = [
        ("A", 0, 1),
        ("A", 5, 1),
        ("B", 2, 1),
        ("A", 0, 0),
        ("B", 7, 1),
        ("B", 2, 0),
        ("A", 5, 1),
    ];
    let mut expected = PortValues::default();
    for (port, pin, state) in writes {
        let port_enum: Port = port.parse().unwrap();
        expected = expected.with_pin(port_enum, pin, state == 1);
        assert_eq!(supervisor.set_expander_pin(port, pin, state).unwrap(), expected);
    }

    // Hardware scribbles are never read back into the latch
    hat.bus.poke(MCP23017_ADDRESS, regs::OLATA, 0xFF);
    assert_eq!(supervisor.snapshot().outputs, expected);
    assert_eq!(expected, PortValues::new(0x20, 0x80));
}

/// Test that latch writes ignore the direction mask
#[test]
fn test_write_outputs_ignores_direction() {
    let bus = Arc::new(SimulatedBus::new());
    let io = ExpanderIO::initialize(bus.clone(), None, PortValues::new(0xFF, 0x00)).unwrap();

    io.write_outputs(PortValues::new(0x0F, 0x00)).unwrap();
    assert_eq!(io.outputs().a, 0x0F);
    assert_eq!(bus.peek(MCP23017_ADDRESS, regs::OLATA), 0x0F);
}

/// Test that simultaneous pin writes on one port lose no bits
#[test]
fn test_concurrent_expander_writes() {
    let hat = SimulatedHat::new();
    let supervisor = Arc::new(HardwareSupervisor::start(&hat).unwrap());

    let handles: Vec<_> = [1u8, 6u8]
        .into_iter()
        .map(|pin| {
            let supervisor = supervisor.clone();
            thread::spawn(move || supervisor.set_expander_pin("B", pin, 1).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(supervisor.snapshot().outputs.b, 0b0100_0010);
}

/// Test that pins off the allow-list are always refused
#[test]
fn test_unsafe_pins_are_refused() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    for pin in (0..=40u8).filter(|pin| !is_safe_pin(*pin)) {
        assert!(matches!(
            supervisor.setup_native_pin(pin, "OUT"),
            Err(HatError::UnsafePin(p)) if p == pin
        ));
        assert!(!supervisor.native_status().configs.contains_key(&pin));
    }
    assert_eq!(supervisor.native_status().safe_pins, SAFE_PINS.to_vec());
}

/// Test that a reset pin can be set up again from scratch
#[test]
fn test_reset_then_setup_starts_clean() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    supervisor.setup_native_pin(20, "OUT").unwrap();
    supervisor.write_native_pin(20, 1).unwrap();
    let status = supervisor.reset_native_pin(20).unwrap();
    assert!(!status.configs.contains_key(&20));
    assert!(!status.states.contains_key(&20));

    let status = supervisor.setup_native_pin(20, "OUT").unwrap();
    assert_eq!(status.configs[&20], PinMode::Output);
    assert_eq!(status.states[&20], Some(0));
}

/// Test that output state comes from the last command, not a hardware read
#[test]
fn test_output_state_never_reads_hardware() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();
    supervisor.setup_native_pin(16, "OUT").unwrap();
    supervisor.write_native_pin(16, 1).unwrap();

    hat.pins.set_fail_reads(true);
    let status = supervisor.native_status();
    assert_eq!(status.states[&16], Some(1));
}

/// Test message length validation at the boundaries
#[test]
fn test_message_length_boundaries() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    assert!(matches!(supervisor.send_transceiver_message(""), Err(HatError::InvalidInput(_))));
    assert!(matches!(
        supervisor.send_transceiver_message(&"a".repeat(256)),
        Err(HatError::InvalidInput(_))
    ));
    assert!(supervisor.send_transceiver_message(&"a".repeat(255)).unwrap());
    assert_eq!(hat.serial.sent().len(), 256);
}

/// Test that a received line becomes the last message
#[test]
fn test_received_line_is_reported() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();
    assert_eq!(supervisor.last_transceiver_message(), None);

    hat.serial.feed(b"TEMP:21.5\n");
    assert!(wait_for(
        || supervisor.last_transceiver_message().as_deref() == Some("TEMP:21.5")
    ));
    assert_eq!(supervisor.snapshot().rs485_last.as_deref(), Some("TEMP:21.5"));
}

/// Test the direction line is high only while transmitting
#[test]
fn test_direction_line_during_send() {
    let hat = SimulatedHat::new();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    assert!(supervisor.send_transceiver_message("PING").unwrap());
    assert_eq!(hat.serial.direction_during_writes(), vec![true]);
    assert_eq!(hat.pins.level(DIRECTION_PIN), Some(false));
}

/// Test startup with no working subsystem
#[test]
fn test_zero_subsystems_fails_startup() {
    let hat = SimulatedHat::new().without_gpio().without_serial();
    hat.bus.set_offline(MCP23017_ADDRESS, true);

    let err = HardwareSupervisor::start(&hat).err().unwrap();
    assert!(matches!(err, HatError::Startup(_)));
}

/// Test startup with exactly one working subsystem
#[test]
fn test_single_subsystem_defaults_the_rest() {
    let hat = SimulatedHat::new().without_gpio();
    let supervisor = HardwareSupervisor::start(&hat).unwrap();

    let status = supervisor.availability();
    assert!(status.mcp23017);
    assert!(!status.rs485);
    assert!(!status.rpi_gpio);

    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.adc.len(), 4);
    assert_eq!(snapshot.rs485_last, None);
    assert!(snapshot.rpi_gpio.configs.is_empty());
    assert!(snapshot.rpi_gpio.safe_pins.is_empty());
    assert!(matches!(
        supervisor.setup_native_pin(4, "IN"),
        Err(HatError::Unavailable(Subsystem::NativeGpio))
    ));
}

/// Test HatError creation and formatting
#[test]
fn test_error_types() {
    assert_eq!(
        HatError::Unavailable(Subsystem::Expander).to_string(),
        "MCP23017 not available"
    );
    assert_eq!(HatError::UnsafePin(2).to_string(), "Pin 2 is not safe to use");
    assert!(HatError::InvalidMode("PWM".to_string()).is_caller_error());
    assert!(!HatError::transport_error("gone").is_caller_error());
}

/// Test the simulated pins directly
#[test]
fn test_simulated_pins_track_claims() {
    use tophat_dashboard::hardware::PinDriver;

    let pins = SimulatedPins::new();
    let line = pins.claim_output(24, true).unwrap();
    assert_eq!(pins.level(24), Some(true));
    drop(line);
    assert_eq!(pins.level(24), None);
}

/// Test WebConfig builder pattern
#[test]
fn test_web_config() {
    let config = WebConfig::default()
        .with_host("127.0.0.1")
        .with_port(8080)
        .with_cors(false);

    assert_eq!(config.bind_address(), "127.0.0.1:8080");
    assert!(!config.enable_cors);
}
