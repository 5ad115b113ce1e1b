//! In-memory Top HAT used by the test suite and by `--simulate`.
//!
//! The bus carries register-level models of the ADS1015 and the MCP23017, so
//! the real drivers run unmodified against it. GPIO lines and the serial
//! port record what was done to them and can be told to fail.

use crate::error::{HatError, Result};
use crate::hardware::adc::{self, ADS1015_ADDRESS};
use crate::hardware::expander::{regs as mcp, PortValues, MCP23017_ADDRESS};
use crate::hardware::traits::{InputLine, OutputLine, PinDriver, Platform, RegisterBus, SerialPort};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

const MCP_REGISTER_COUNT: usize = 0x16;

#[derive(Debug, Default)]
struct AdcModel {
    config: u16,
    conversion: u16,
    raw: [i16; adc::CHANNEL_COUNT as usize],
    stalled: bool,
}

impl AdcModel {
    fn write(&mut self, register: u8, data: &[u8]) -> Result<()> {
        let [hi, lo] = data else {
            return Err(HatError::bus_error(ADS1015_ADDRESS, "ADS1015 registers are 16-bit"));
        };
        let word = u16::from_be_bytes([*hi, *lo]);
        if register != adc::regs::CONFIG {
            return Ok(());
        }

        if adc::conversion_ready(word) {
            let mux = (word >> 12) & 0b111;
            self.conversion = match mux.checked_sub(0b100) {
                Some(channel) => adc::encode_conversion(self.raw[usize::from(channel)]),
                None => 0,
            };
        }
        self.config = if self.stalled { word & 0x7FFF } else { word | 0x8000 };
        Ok(())
    }

    fn read(&self, register: u8, buffer: &mut [u8]) {
        let word = match register {
            adc::regs::CONVERSION => self.conversion,
            adc::regs::CONFIG => self.config,
            _ => 0,
        };
        for (dst, src) in buffer.iter_mut().zip(word.to_be_bytes()) {
            *dst = src;
        }
    }
}

#[derive(Debug)]
struct ExpanderModel {
    regs: [u8; MCP_REGISTER_COUNT],
    inputs: PortValues,
}

impl Default for ExpanderModel {
    fn default() -> Self {
        let mut regs = [0u8; MCP_REGISTER_COUNT];
        // Power-on state: every pin an input
        regs[usize::from(mcp::IODIRA)] = 0xFF;
        regs[usize::from(mcp::IODIRB)] = 0xFF;
        Self {
            regs,
            inputs: PortValues::default(),
        }
    }
}

impl ExpanderModel {
    fn write(&mut self, register: u8, data: &[u8]) {
        for (offset, &value) in data.iter().enumerate() {
            let mut reg = usize::from(register) + offset;
            // Writing GPIOx writes the latch
            if reg == usize::from(mcp::GPIOA) || reg == usize::from(mcp::GPIOB) {
                reg += 2;
            }
            if let Some(slot) = self.regs.get_mut(reg) {
                *slot = value;
            }
        }
    }

    fn pin_levels(&self, dir: u8, latch: u8, inputs: u8) -> u8 {
        let dir = self.regs[usize::from(dir)];
        let latch = self.regs[usize::from(latch)];
        (inputs & dir) | (latch & !dir)
    }

    fn read_reg(&self, reg: usize) -> u8 {
        if reg == usize::from(mcp::GPIOA) {
            self.pin_levels(mcp::IODIRA, mcp::OLATA, self.inputs.a)
        } else if reg == usize::from(mcp::GPIOB) {
            self.pin_levels(mcp::IODIRB, mcp::OLATB, self.inputs.b)
        } else {
            self.regs.get(reg).copied().unwrap_or(0)
        }
    }

    fn read(&self, register: u8, buffer: &mut [u8]) {
        for (offset, dst) in buffer.iter_mut().enumerate() {
            *dst = self.read_reg(usize::from(register) + offset);
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    adc: AdcModel,
    expander: ExpanderModel,
    offline: HashSet<u8>,
    transactions: usize,
}

impl BusState {
    fn check_present(&mut self, address: u8) -> Result<()> {
        self.transactions += 1;
        let known = address == ADS1015_ADDRESS || address == MCP23017_ADDRESS;
        if !known || self.offline.contains(&address) {
            return Err(HatError::bus_error(address, "no acknowledgment from device"));
        }
        Ok(())
    }
}

/// I2C bus with an ADS1015 at 0x49 and an MCP23017 at 0x20.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    state: Mutex<BusState>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value the ADC will convert on `channel`.
    pub fn set_adc_raw(&self, channel: u8, raw12: i16) {
        if let Some(slot) = self.state.lock().adc.raw.get_mut(usize::from(channel)) {
            *slot = raw12;
        }
    }

    /// Keep the ADC's conversion-complete bit clear.
    pub fn set_adc_stalled(&self, stalled: bool) {
        self.state.lock().adc.stalled = stalled;
    }

    /// Stop (or resume) acknowledging transactions for `address`.
    pub fn set_offline(&self, address: u8, offline: bool) {
        let mut state = self.state.lock();
        if offline {
            state.offline.insert(address);
        } else {
            state.offline.remove(&address);
        }
    }

    /// External levels seen on the expander's input pins.
    pub fn set_expander_inputs(&self, inputs: PortValues) {
        self.state.lock().expander.inputs = inputs;
    }

    /// Write an expander register behind the driver's back.
    pub fn poke(&self, address: u8, register: u8, value: u8) {
        if address == MCP23017_ADDRESS {
            self.state.lock().expander.write(register, &[value]);
        }
    }

    /// Read an expander register without counting a transaction.
    pub fn peek(&self, address: u8, register: u8) -> u8 {
        if address == MCP23017_ADDRESS {
            self.state.lock().expander.read_reg(usize::from(register))
        } else {
            0
        }
    }

    /// Number of transactions attempted so far.
    pub fn transactions(&self) -> usize {
        self.state.lock().transactions
    }
}

impl RegisterBus for SimulatedBus {
    fn write_register(&self, address: u8, register: u8, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.check_present(address)?;
        match address {
            ADS1015_ADDRESS => state.adc.write(register, data),
            _ => {
                state.expander.write(register, data);
                Ok(())
            }
        }
    }

    fn read_register(&self, address: u8, register: u8, buffer: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.check_present(address)?;
        match address {
            ADS1015_ADDRESS => state.adc.read(register, buffer),
            _ => state.expander.read(register, buffer),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimLine {
    claimed: bool,
    output: bool,
    level: bool,
    input_level: bool,
    history: Vec<bool>,
}

#[derive(Debug, Default)]
struct PinsState {
    lines: HashMap<u8, SimLine>,
    fail_claims: bool,
    fail_reads: bool,
    reads: usize,
}

type SharedPins = Arc<Mutex<PinsState>>;

/// Host GPIO controller whose lines live in memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPins {
    state: SharedPins,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent claim fail.
    pub fn set_fail_claims(&self, fail: bool) {
        self.state.lock().fail_claims = fail;
    }

    /// Make every subsequent input sample fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Level an input line on `pin` will read.
    pub fn set_input_level(&self, pin: u8, high: bool) {
        self.state.lock().lines.entry(pin).or_default().input_level = high;
    }

    /// Number of input samples taken so far.
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        self.state.lock().lines.get(&pin).is_some_and(|line| line.claimed)
    }

    /// Level of a claimed line: driven level for outputs, external level for inputs.
    pub fn level(&self, pin: u8) -> Option<bool> {
        let state = self.state.lock();
        let line = state.lines.get(&pin).filter(|line| line.claimed)?;
        Some(if line.output { line.level } else { line.input_level })
    }

    /// Every level `pin` has been driven to, in order.
    pub fn history(&self, pin: u8) -> Vec<bool> {
        self.state
            .lock()
            .lines
            .get(&pin)
            .map(|line| line.history.clone())
            .unwrap_or_default()
    }

    fn claim(&self, pin: u8, output: bool, initial: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_claims {
            return Err(HatError::gpio_error(format!("pin {} not available", pin)));
        }
        let line = state.lines.entry(pin).or_default();
        if line.claimed {
            return Err(HatError::gpio_error(format!("pin {} is already in use", pin)));
        }
        line.claimed = true;
        line.output = output;
        if output {
            line.level = initial;
            line.history.push(initial);
        }
        Ok(())
    }
}

struct SimOutputLine {
    pin: u8,
    state: SharedPins,
}

impl OutputLine for SimOutputLine {
    fn set(&mut self, high: bool) -> Result<()> {
        let mut state = self.state.lock();
        let line = state.lines.entry(self.pin).or_default();
        line.level = high;
        line.history.push(high);
        Ok(())
    }
}

struct SimInputLine {
    pin: u8,
    state: SharedPins,
}

impl InputLine for SimInputLine {
    fn is_high(&mut self) -> Result<bool> {
        let mut state = self.state.lock();
        state.reads += 1;
        if state.fail_reads {
            return Err(HatError::gpio_error(format!("failed to read pin {}", self.pin)));
        }
        Ok(state.lines.get(&self.pin).is_some_and(|line| line.input_level))
    }
}

fn release(state: &SharedPins, pin: u8) {
    if let Some(line) = state.lock().lines.get_mut(&pin) {
        line.claimed = false;
    }
}

impl Drop for SimOutputLine {
    fn drop(&mut self) {
        release(&self.state, self.pin);
    }
}

impl Drop for SimInputLine {
    fn drop(&mut self) {
        release(&self.state, self.pin);
    }
}

impl PinDriver for SimulatedPins {
    fn claim_output(&self, pin: u8, initial: bool) -> Result<Box<dyn OutputLine>> {
        self.claim(pin, true, initial)?;
        Ok(Box::new(SimOutputLine {
            pin,
            state: self.state.clone(),
        }))
    }

    fn claim_input(&self, pin: u8) -> Result<Box<dyn InputLine>> {
        self.claim(pin, false, false)?;
        Ok(Box::new(SimInputLine {
            pin,
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug, Default)]
struct SerialState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    failing_reads: usize,
    fail_writes: bool,
    closed: bool,
    echo: bool,
    direction_at_write: Vec<bool>,
}

/// Test-side handle to a simulated serial line.
#[derive(Clone, Default)]
pub struct SimulatedSerial {
    state: Arc<Mutex<SerialState>>,
    probe: Option<(Arc<SimulatedPins>, u8)>,
}

impl SimulatedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the level of `pin` every time data is written.
    pub fn with_direction_probe(mut self, pins: Arc<SimulatedPins>, pin: u8) -> Self {
        self.probe = Some((pins, pin));
        self
    }

    /// Have the far end answer every frame with `ECHO:<frame>`.
    pub fn with_echo(self) -> Self {
        self.state.lock().echo = true;
        self
    }

    /// A port for the driver to own. Dropping it closes the line.
    pub fn port(&self) -> SimulatedSerialPort {
        self.state.lock().closed = false;
        SimulatedSerialPort {
            serial: self.clone(),
        }
    }

    /// Bytes arriving from the bus.
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
    }

    /// Everything written so far.
    pub fn sent(&self) -> Vec<u8> {
        self.state.lock().outbound.clone()
    }

    /// Fail the next `count` reads.
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().failing_reads = count;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Direction-line level observed at each write.
    pub fn direction_during_writes(&self) -> Vec<bool> {
        self.state.lock().direction_at_write.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Driver-side end of a [`SimulatedSerial`].
pub struct SimulatedSerialPort {
    serial: SimulatedSerial,
}

impl SerialPort for SimulatedSerialPort {
    fn bytes_available(&mut self) -> Result<usize> {
        let mut state = self.serial.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(HatError::transport_error("simulated read error"));
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.serial.state.lock();
        let count = buffer.len().min(state.inbound.len());
        for (dst, src) in buffer.iter_mut().zip(state.inbound.drain(..count)) {
            *dst = src;
        }
        Ok(count)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let direction = self
            .serial
            .probe
            .as_ref()
            .map(|(pins, pin)| pins.level(*pin) == Some(true));

        let mut state = self.serial.state.lock();
        if state.fail_writes {
            return Err(HatError::transport_error("simulated write error"));
        }
        if let Some(high) = direction {
            state.direction_at_write.push(high);
        }
        state.outbound.extend_from_slice(data);
        if state.echo {
            state.inbound.extend(b"ECHO:".iter().chain(data));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for SimulatedSerialPort {
    fn drop(&mut self) {
        self.serial.state.lock().closed = true;
    }
}

/// A complete simulated board.
pub struct SimulatedHat {
    pub bus: Arc<SimulatedBus>,
    pub pins: Arc<SimulatedPins>,
    pub serial: SimulatedSerial,
    fail_bus: bool,
    fail_gpio: bool,
    fail_serial: bool,
}

impl SimulatedHat {
    /// A board with every device present and idle.
    pub fn new() -> Self {
        let pins = Arc::new(SimulatedPins::new());
        let serial = SimulatedSerial::new()
            .with_direction_probe(pins.clone(), crate::hardware::transceiver::DIRECTION_PIN);
        Self {
            bus: Arc::new(SimulatedBus::new()),
            pins,
            serial,
            fail_bus: false,
            fail_gpio: false,
            fail_serial: false,
        }
    }

    /// A board with some signal on it, for running the dashboard off-target.
    pub fn demo() -> Self {
        let hat = Self::new();
        for (channel, raw) in [(0, 825), (1, 1650), (2, -120), (3, 2047)] {
            hat.bus.set_adc_raw(channel, raw);
        }
        hat.bus.set_expander_inputs(PortValues::new(0x5A, 0xC3));
        hat.pins.set_input_level(4, true);
        Self {
            serial: hat.serial.clone().with_echo(),
            ..hat
        }
    }

    /// The I2C bus cannot be opened.
    pub fn without_bus(mut self) -> Self {
        self.fail_bus = true;
        self
    }

    /// The GPIO controller cannot be opened.
    pub fn without_gpio(mut self) -> Self {
        self.fail_gpio = true;
        self
    }

    /// The serial port cannot be opened.
    pub fn without_serial(mut self) -> Self {
        self.fail_serial = true;
        self
    }
}

impl Default for SimulatedHat {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimulatedHat {
    fn open_bus(&self) -> Result<Arc<dyn RegisterBus>> {
        if self.fail_bus {
            return Err(HatError::config_error("simulated I2C bus unavailable"));
        }
        Ok(self.bus.clone())
    }

    fn pin_driver(&self) -> Result<Arc<dyn PinDriver>> {
        if self.fail_gpio {
            return Err(HatError::gpio_error("simulated GPIO controller unavailable"));
        }
        Ok(self.pins.clone())
    }

    fn open_serial(&self) -> Result<Box<dyn SerialPort>> {
        if self.fail_serial {
            return Err(HatError::transport_error("simulated serial port unavailable"));
        }
        Ok(Box::new(self.serial.port()))
    }
}
