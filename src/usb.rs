//! USB peripheral enumeration via `lsusb`.
//!
//! Listings are cached for a few seconds so that a dashboard polling several
//! endpoints does not spawn a process per request.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Hard limit on how long `lsusb` may run.
pub const USB_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a successful listing is reused.
pub const CACHE_TTL: Duration = Duration::from_secs(5);

/// One attached USB device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub bus: u32,
    pub device: u32,
    /// Four hex digits, as printed by `lsusb`
    pub vendor_id: String,
    /// Four hex digits, as printed by `lsusb`
    pub product_id: String,
    pub description: String,
    /// `vendor_id:product_id`
    pub id: String,
}

fn is_hex4(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse one `lsusb` line:
/// `Bus 001 Device 002: ID 1d6b:0002 Linux Foundation 2.0 root hub`.
pub fn parse_usb_line(line: &str) -> Option<UsbDevice> {
    let mut parts = line.trim().splitn(6, ' ');

    let keyword = parts.next()?;
    let bus = parts.next()?;
    let device_keyword = parts.next()?;
    let device = parts.next()?.strip_suffix(':')?;
    let id_keyword = parts.next()?;
    let rest = parts.next()?;

    if !keyword.eq_ignore_ascii_case("bus")
        || !device_keyword.eq_ignore_ascii_case("device")
        || !id_keyword.eq_ignore_ascii_case("id")
    {
        return None;
    }

    let (ids, description) = rest.split_once(' ').unwrap_or((rest, ""));
    let (vendor_id, product_id) = ids.split_once(':')?;
    if !is_hex4(vendor_id) || !is_hex4(product_id) {
        return None;
    }

    let description = description.trim();
    Some(UsbDevice {
        bus: bus.parse().ok()?,
        device: device.parse().ok()?,
        vendor_id: vendor_id.to_string(),
        product_id: product_id.to_string(),
        description: if description.is_empty() {
            "Unknown Device".to_string()
        } else {
            description.to_string()
        },
        id: format!("{}:{}", vendor_id, product_id),
    })
}

/// Parse full `lsusb` output, skipping root hubs and unparseable lines.
pub fn parse_lsusb_output(output: &str) -> Vec<UsbDevice> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.to_lowercase().contains("root hub"))
        .filter_map(|line| {
            let parsed = parse_usb_line(line);
            if parsed.is_none() {
                debug!("Failed to parse USB line '{}'", line);
            }
            parsed
        })
        .collect()
}

struct CachedListing {
    fetched: Instant,
    devices: Vec<UsbDevice>,
}

/// Cached view of the attached USB devices.
pub struct UsbMonitor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    cache: Mutex<Option<CachedListing>>,
}

impl Default for UsbMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbMonitor {
    /// Monitor that runs the system `lsusb`.
    pub fn new() -> Self {
        Self::with_command("lsusb", Vec::<String>::new())
    }

    /// Monitor that runs `program` instead of `lsusb`.
    pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: USB_TIMEOUT,
            cache: Mutex::new(None),
        }
    }

    /// Override the process timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attached devices, excluding root hubs. Empty if enumeration fails.
    pub async fn list_devices(&self) -> Vec<UsbDevice> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched.elapsed() < CACHE_TTL {
                return cached.devices.clone();
            }
        }

        match self.run().await {
            Some(devices) => {
                *cache = Some(CachedListing {
                    fetched: Instant::now(),
                    devices: devices.clone(),
                });
                devices
            }
            None => Vec::new(),
        }
    }

    /// Whether anything other than a root hub is attached.
    pub async fn is_connected(&self) -> bool {
        !self.list_devices().await.is_empty()
    }

    pub async fn device_count(&self) -> usize {
        self.list_devices().await.len()
    }

    /// Find a device by vendor and product ID.
    pub async fn find_device(&self, vendor_id: u16, product_id: u16) -> Option<UsbDevice> {
        let target = format!("{:04x}:{:04x}", vendor_id, product_id);
        self.list_devices()
            .await
            .into_iter()
            .find(|device| device.id.to_lowercase() == target)
    }

    /// Forget the cached listing so the next call re-enumerates.
    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    async fn run(&self) -> Option<Vec<UsbDevice>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Failed to run {}: {}", self.program, e);
                return None;
            }
            Err(_) => {
                error!("{} command timed out", self.program);
                return None;
            }
        };

        if !output.status.success() {
            warn!("{} returned error code {:?}", self.program, output.status.code());
            return None;
        }

        Some(parse_lsusb_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Bus 002 Device 001: ID 1d6b:0003 Linux Foundation 3.0 root hub
Bus 001 Device 003: ID 0403:6001 Future Technology Devices International, Ltd FT232 Serial (UART) IC
Bus 001 Device 004: ID 046D:C52B
Bus 001 Device 001: ID 1d6b:0002 Linux Foundation 2.0 root hub
not an lsusb line
";

    #[test]
    fn test_parse_usb_line() {
        let device =
            parse_usb_line("Bus 001 Device 003: ID 0403:6001 Future Technology Devices International, Ltd FT232 Serial (UART) IC")
                .unwrap();
        assert_eq!(device.bus, 1);
        assert_eq!(device.device, 3);
        assert_eq!(device.vendor_id, "0403");
        assert_eq!(device.product_id, "6001");
        assert_eq!(device.id, "0403:6001");
        assert!(device.description.starts_with("Future Technology"));
    }

    #[test]
    fn test_parse_usb_line_without_description() {
        let device = parse_usb_line("Bus 001 Device 004: ID 046d:c52b").unwrap();
        assert_eq!(device.description, "Unknown Device");
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(parse_usb_line("").is_none());
        assert!(parse_usb_line("Bus 001 Device 004 ID 046d:c52b").is_none());
        assert!(parse_usb_line("Bus 001 Device 004: ID 46d:c52b mouse").is_none());
        assert!(parse_usb_line("Bus xyz Device 004: ID 046d:c52b mouse").is_none());
    }

    #[test]
    fn test_parse_output_skips_root_hubs() {
        let devices = parse_lsusb_output(SAMPLE);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "0403:6001");
        assert_eq!(devices[1].id, "046D:C52B");
    }

    fn sample_monitor() -> UsbMonitor {
        UsbMonitor::with_command("sh", ["-c".to_string(), format!("printf '{}'", SAMPLE)])
    }

    #[tokio::test]
    async fn test_monitor_lists_and_finds_devices() {
        let monitor = sample_monitor();
        assert!(monitor.is_connected().await);
        assert_eq!(monitor.device_count().await, 2);

        let found = monitor.find_device(0x046d, 0xc52b).await.unwrap();
        assert_eq!(found.device, 4);
        assert!(monitor.find_device(0x1234, 0x5678).await.is_none());
    }

    #[tokio::test]
    async fn test_listing_is_cached_until_cleared() {
        let monitor = UsbMonitor::with_command(
            "sh",
            ["-c", "echo \"Bus 001 Device 002: ID 0403:6001 shell $$\""],
        );

        // Each run reports its own PID, so a repeat listing shows whether it re-ran
        let first = monitor.list_devices().await;
        assert_eq!(first.len(), 1);
        assert_eq!(monitor.list_devices().await, first);

        monitor.clear_cache().await;
        assert_ne!(monitor.list_devices().await, first);
    }

    #[tokio::test]
    async fn test_failures_yield_no_devices() {
        let failing = UsbMonitor::with_command("sh", ["-c", "exit 1"]);
        assert!(failing.list_devices().await.is_empty());
        assert!(!failing.is_connected().await);

        let missing = UsbMonitor::with_command("/nonexistent/lsusb", Vec::<String>::new());
        assert!(missing.list_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_yields_no_devices() {
        let slow = UsbMonitor::with_command("sh", ["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100));

        let started = Instant::now();
        assert!(slow.list_devices().await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
