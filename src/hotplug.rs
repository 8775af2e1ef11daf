//! Hot-plug event sources
//!
//! The engine only needs to know when a device appeared. Sources are polled
//! [`DeviceScanner`]s whose snapshots are diffed by a [`ScanMonitor`]:
//! - [`PortScanner`] lists MIDI driver ports. It works on every platform
//!   midir supports but cannot see USB vendor/product ids.
//! - [`UsbScanner`] lists USB devices through nusb and reports their ids.
//!
//! Both report through the same [`HotplugEvent`] type.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;
use crate::port::PortBackend;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(2000);

/// Identity of a device that appeared or went away
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceInfo {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub name: String,
}

impl DeviceInfo {
    /// Device known only by its port name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            name: name.into(),
        }
    }

    /// Device with USB vendor/product ids
    pub fn usb(vendor_id: u16, product_id: u16, name: impl Into<String>) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            name: name.into(),
        }
    }

    pub fn has_ids(&self) -> bool {
        self.vendor_id.is_some() && self.product_id.is_some()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => write!(f, "'{}' ({:04x}:{:04x})", self.name, vid, pid),
            _ => write!(f, "'{}'", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(DeviceInfo),
    Detached(DeviceInfo),
}

/// Difference between two device listings, detaches first
pub fn diff_devices(before: &BTreeSet<DeviceInfo>, after: &BTreeSet<DeviceInfo>) -> Vec<HotplugEvent> {
    let attached = after
        .difference(before)
        .map(|device| HotplugEvent::Attached(device.clone()));
    let detached = before
        .difference(after)
        .map(|device| HotplugEvent::Detached(device.clone()));
    detached.chain(attached).collect()
}

/// One snapshot of the currently present devices
pub trait DeviceScanner {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn scan(&self) -> Result<Vec<DeviceInfo>>;
}

/// MIDI input ports as devices without ids
pub struct PortScanner<B> {
    backend: B,
}

impl<B: PortBackend> PortScanner<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: PortBackend> DeviceScanner for PortScanner<B> {
    fn name(&self) -> &str {
        "midi ports"
    }

    fn scan(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .backend
            .port_names()?
            .into_iter()
            .map(DeviceInfo::named)
            .collect())
    }
}

/// USB devices with vendor/product ids
#[derive(Debug, Clone, Default)]
pub struct UsbScanner;

impl DeviceScanner for UsbScanner {
    fn name(&self) -> &str {
        "usb"
    }

    fn scan(&self) -> Result<Vec<DeviceInfo>> {
        let devices = nusb::list_devices().context("Failed to list USB devices")?;
        Ok(devices
            .map(|dev| {
                let name = dev
                    .product_string()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:04x}:{:04x}", dev.vendor_id(), dev.product_id()));
                DeviceInfo::usb(dev.vendor_id(), dev.product_id(), name)
            })
            .collect())
    }
}

/// Polls a scanner and reports devices that appear or disappear
pub struct ScanMonitor<S> {
    scanner: S,
    interval: Duration,
}

impl<S> ScanMonitor<S>
where
    S: DeviceScanner + Send + Sync + 'static,
{
    /// Create a monitor that polls `scanner` every `interval`
    pub fn new(scanner: S, interval: Duration) -> Self {
        Self { scanner, interval }
    }

    fn snapshot(&self) -> BTreeSet<DeviceInfo> {
        match self.scanner.scan() {
            Ok(devices) => devices.into_iter().collect(),
            Err(e) => {
                debug!("{} scan failed: {:#}", self.scanner.name(), e);
                BTreeSet::new()
            }
        }
    }

    /// Stream hotplug events into a channel until the receiver is dropped
    pub fn spawn(self, tx: mpsc::Sender<HotplugEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut known = self.snapshot();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                "🔌 {} monitor started ({} devices known)",
                self.scanner.name(),
                known.len()
            );

            loop {
                ticker.tick().await;
                let current = self.snapshot();
                for event in diff_devices(&known, &current) {
                    if tx.send(event).await.is_err() {
                        debug!("{} monitor stopped", self.scanner.name());
                        return;
                    }
                }
                known = current;
            }
        })
    }
}

/// Forward hotplug events to the engine
pub fn forward_to_engine(mut rx: mpsc::Receiver<HotplugEvent>, engine: EngineHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                HotplugEvent::Attached(device) => engine.device_attached(device),
                HotplugEvent::Detached(device) => {
                    debug!("Device detached: {}", device);
                }
            }
        }
        warn!("Hotplug event stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::VirtualBackend;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn set(devices: &[DeviceInfo]) -> BTreeSet<DeviceInfo> {
        devices.iter().cloned().collect()
    }

    #[test]
    fn test_diff_devices() {
        let events = diff_devices(
            &set(&[DeviceInfo::named("Midi Through"), DeviceInfo::named("PSS-A50")]),
            &set(&[DeviceInfo::named("Midi Through"), DeviceInfo::usb(0x0499, 0x1000, "PSS-A50")]),
        );
        assert_eq!(
            events,
            vec![
                HotplugEvent::Detached(DeviceInfo::named("PSS-A50")),
                HotplugEvent::Attached(DeviceInfo::usb(0x0499, 0x1000, "PSS-A50")),
            ]
        );
    }

    #[test]
    fn test_diff_devices_unchanged() {
        let devices = set(&[DeviceInfo::named("a")]);
        assert!(diff_devices(&devices, &devices).is_empty());
    }

    #[test]
    fn test_device_display() {
        assert_eq!(DeviceInfo::usb(0x0499, 0x1000, "PSS").to_string(), "'PSS' (0499:1000)");
        assert_eq!(DeviceInfo::named("PSS").to_string(), "'PSS'");
        assert!(!DeviceInfo::named("PSS").has_ids());
    }

    #[test]
    fn test_port_scanner_reports_names() {
        let scanner = PortScanner::new(VirtualBackend::new(["Midi Through", "PSS-A50"]));
        assert_eq!(
            scanner.scan().unwrap(),
            vec![DeviceInfo::named("Midi Through"), DeviceInfo::named("PSS-A50")]
        );
    }

    #[test]
    fn test_usb_scan_does_not_panic() {
        let _ = UsbScanner.scan();
    }

    #[derive(Clone, Default)]
    struct FakeBus {
        devices: Arc<Mutex<Vec<DeviceInfo>>>,
    }

    impl DeviceScanner for FakeBus {
        fn name(&self) -> &str {
            "fake"
        }

        fn scan(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.lock().clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_plug_cycle() {
        let bus = FakeBus::default();
        bus.devices.lock().push(DeviceInfo::usb(1177, 4096, "PSS-A50"));

        let (tx, mut rx) = mpsc::channel(8);
        let _task = ScanMonitor::new(bus.clone(), DEFAULT_SCAN_INTERVAL).spawn(tx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.devices.lock().clear();
        assert_eq!(
            rx.recv().await,
            Some(HotplugEvent::Detached(DeviceInfo::usb(1177, 4096, "PSS-A50")))
        );

        bus.devices.lock().push(DeviceInfo::usb(1177, 4096, "PSS-A50"));
        assert_eq!(
            rx.recv().await,
            Some(HotplugEvent::Attached(DeviceInfo::usb(1177, 4096, "PSS-A50")))
        );
    }
}
