//! RS-485 half-duplex link.
//!
//! The transceiver's DE/RE pins are tied together and driven from one GPIO
//! line: low listens, high drives the bus. A background thread assembles
//! received bytes into lines and keeps only the most recent one.

use crate::error::{HatError, Result};
use crate::hardware::traits::{OutputLine, SerialPort};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// BCM pin driving DE/RE (high = transmit, low = receive).
pub const DIRECTION_PIN: u8 = 6;

/// Serial device wired to the transceiver.
pub const SERIAL_PATH: &str = "/dev/serial0";

/// Line rate, 8N1.
pub const BAUD_RATE: u32 = 9600;

/// Time for the transceiver to switch to transmit.
pub const DIRECTION_SETTLE: Duration = Duration::from_millis(10);

/// Pause after a serial read error before trying again.
pub const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 256;

/// Longest partial line kept while waiting for a terminator.
pub const MAX_LINE_BYTES: usize = 4096;

/// Single-slot holder of the most recently received message.
#[derive(Debug, Default)]
pub struct MessageCell {
    last: RwLock<Option<String>>,
}

impl MessageCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored message.
    pub fn store(&self, message: String) {
        *self.last.write() = Some(message);
    }

    /// The most recent message, if any has arrived.
    pub fn latest(&self) -> Option<String> {
        self.last.read().clone()
    }
}

/// Splits a byte stream into newline-terminated text lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
    // Set after an overflow until the next newline
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every line they complete.
    ///
    /// Lines are decoded lossily and trimmed; blank lines are dropped. A
    /// line longer than [`MAX_LINE_BYTES`] is dropped whole, up to and
    /// including its newline.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if self.discarding {
                if byte == b'\n' {
                    self.discarding = false;
                }
            } else if byte == b'\n' {
                let text = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if !text.is_empty() {
                    lines.push(text);
                }
            } else if self.pending.len() < MAX_LINE_BYTES {
                self.pending.push(byte);
            } else {
                warn!("RS-485 line exceeded {} bytes, discarding", MAX_LINE_BYTES);
                self.pending.clear();
                self.discarding = true;
            }
        }
        lines
    }
}

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Owns the serial port, the direction line and the receive thread.
pub struct TransceiverLink {
    port: SharedPort,
    // Held for the whole of a send, which serializes transmissions
    direction: Mutex<Option<Box<dyn OutputLine>>>,
    last: Arc<MessageCell>,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TransceiverLink {
    /// Put the transceiver in receive mode and start the listener thread.
    pub fn start(port: Box<dyn SerialPort>, mut direction: Box<dyn OutputLine>) -> Result<Self> {
        direction.set(false)?;

        let port: SharedPort = Arc::new(Mutex::new(Some(port)));
        let last = Arc::new(MessageCell::new());
        let running = Arc::new(AtomicBool::new(true));

        let listener = {
            let port = port.clone();
            let last = last.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("rs485-rx".to_string())
                .spawn(move || listen_loop(port, last, running))
                .map_err(|e| HatError::transport_error(format!("Failed to start listener: {}", e)))?
        };

        info!("RS-485 listener started");
        Ok(Self {
            port,
            direction: Mutex::new(Some(direction)),
            last,
            running,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Transmit `message` followed by a newline.
    ///
    /// Returns false on any transport or direction-line failure. The
    /// direction line is returned to receive even when the write fails.
    pub fn send(&self, message: &str) -> bool {
        let mut direction = self.direction.lock();
        let Some(line) = direction.as_mut() else {
            error!("RS-485 send after shutdown");
            return false;
        };

        let result = line
            .set(true)
            .and_then(|_| {
                thread::sleep(DIRECTION_SETTLE);
                self.transmit(message)
            });
        let restored = line.set(false);

        match result.and(restored) {
            Ok(()) => {
                info!("TX: {}", message);
                true
            }
            Err(e) => {
                error!("RS-485 send error: {}", e);
                false
            }
        }
    }

    fn transmit(&self, message: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        let mut port = self.port.lock();
        let port = port
            .as_mut()
            .ok_or_else(|| HatError::transport_error("serial port closed"))?;
        port.write_all(&frame)?;
        port.flush()
    }

    /// Most recent received line, if any.
    pub fn last_message(&self) -> Option<String> {
        self.last.latest()
    }

    /// Stop the listener, close the port and release the direction line.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.listener.lock().take() {
            if handle.join().is_err() {
                warn!("RS-485 listener thread panicked");
            }
        }
        if self.port.lock().take().is_some() {
            info!("RS-485 serial port closed");
        }
        if self.direction.lock().take().is_some() {
            info!("RS-485 direction pin released");
        }
    }
}

fn listen_loop(port: SharedPort, last: Arc<MessageCell>, running: Arc<AtomicBool>) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; READ_CHUNK];

    while running.load(Ordering::Acquire) {
        let received = {
            let mut guard = port.lock();
            match guard.as_mut() {
                Some(port) => read_available(port.as_mut(), &mut buf),
                None => break,
            }
        };

        match received {
            Ok(0) => thread::sleep(POLL_INTERVAL),
            Ok(n) => {
                for line in assembler.push(&buf[..n]) {
                    info!("RX: {}", line);
                    last.store(line);
                }
            }
            Err(e) => {
                warn!("RS-485 read error: {}", e);
                sleep_while_running(&running, READ_RETRY_DELAY);
            }
        }
    }
}

fn read_available(port: &mut dyn SerialPort, buf: &mut [u8]) -> Result<usize> {
    let available = port.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let len = available.min(buf.len());
    port.read(&mut buf[..len])
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Acquire) {
        let step = remaining.min(SHUTDOWN_CHECK);
        thread::sleep(step);
        remaining -= step;
    }
}

impl Drop for TransceiverLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
