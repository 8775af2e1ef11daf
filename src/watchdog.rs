//! Device connectivity watchdog
//!
//! Hardware that silently drops off the bus looks exactly like hardware
//! nobody touches, so the watchdog does not try to tell them apart: after a
//! long enough silence the port is simply reopened. Hot-plug attach events for
//! the configured device trigger an earlier reopen.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::hotplug::DeviceInfo;

pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(600_000);

/// Delay between an attach event and the reopen, so the OS can finish enumeration
pub const DEFAULT_ATTACH_DELAY: Duration = Duration::from_millis(500);

/// USB vendor/product pair of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
}

/// Liveness of the input stream
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityState {
    pub last_accepted_at: Instant,
    pub port_open: bool,
    pub paused: bool,
}

impl ConnectivityState {
    /// Closed, running, and counting silence from `now`
    pub fn new(now: Instant) -> Self {
        Self {
            last_accepted_at: now,
            port_open: false,
            paused: false,
        }
    }

    /// Record a sample that passed the noise filter
    pub fn accept(&mut self, now: Instant) {
        self.last_accepted_at = now;
    }
}

/// Reaction to a hot-plug attach event
#[derive(Debug, Clone, PartialEq)]
pub enum AttachDecision {
    /// The configured device came back; reopen after the delay
    Reopen { after: Duration },
    /// No identity configured; surface the device so it can be added to config
    Candidate(DeviceInfo),
    /// Some other device
    Ignore,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    interval: Duration,
    attach_delay: Duration,
    identity: Option<DeviceIdentity>,
}

impl Watchdog {
    /// Watchdog reopening after `interval` of silence, and `attach_delay`
    /// after the device matching `identity` attaches
    pub fn new(interval: Duration, attach_delay: Duration, identity: Option<DeviceIdentity>) -> Self {
        Self {
            interval,
            attach_delay,
            identity,
        }
    }

    /// Period of the staleness check
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// No sample accepted for longer than the interval
    pub fn is_stale(&self, state: &ConnectivityState, now: Instant) -> bool {
        now.saturating_duration_since(state.last_accepted_at) > self.interval
    }

    /// Decide what an attach event means for the input
    ///
    /// `selected_port` is the port the configured `port_name`/`port_index`
    /// resolves to right now. Events without USB ids come from the port
    /// scanner and can only be matched against it.
    pub fn on_attach(&self, device: &DeviceInfo, selected_port: Option<&str>) -> AttachDecision {
        let Some(identity) = self.identity else {
            return AttachDecision::Candidate(device.clone());
        };

        let matches = match (device.vendor_id, device.product_id) {
            (Some(vid), Some(pid)) => vid == identity.vid && pid == identity.pid,
            _ => selected_port == Some(device.name.as_str()),
        };

        if matches {
            AttachDecision::Reopen {
                after: self.attach_delay,
            }
        } else {
            AttachDecision::Ignore
        }
    }
}

/// Config snippet an operator can paste to pin a newly seen device
pub fn candidate_snippet(device: &DeviceInfo) -> String {
    let mut snippet = format!("port_name: '{}'", device.name);
    if let (Some(vid), Some(pid)) = (device.vendor_id, device.product_id) {
        snippet.push_str(&format!("\ndevice: {{ vid: {}, pid: {} }}", vid, pid));
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog(identity: Option<DeviceIdentity>) -> Watchdog {
        Watchdog::new(DEFAULT_WATCHDOG_INTERVAL, DEFAULT_ATTACH_DELAY, identity)
    }

    #[test]
    fn test_staleness_threshold() {
        let dog = watchdog(None);
        let t0 = Instant::now();
        let state = ConnectivityState::new(t0);

        assert!(!dog.is_stale(&state, t0 + DEFAULT_WATCHDOG_INTERVAL));
        assert!(dog.is_stale(&state, t0 + DEFAULT_WATCHDOG_INTERVAL + Duration::from_millis(1)));
    }

    #[test]
    fn test_accept_refreshes() {
        let dog = watchdog(None);
        let t0 = Instant::now();
        let mut state = ConnectivityState::new(t0);

        state.accept(t0 + Duration::from_secs(500));
        assert!(!dog.is_stale(&state, t0 + Duration::from_secs(700)));
    }

    #[test]
    fn test_attach_matching_usb_identity() {
        let dog = watchdog(Some(DeviceIdentity { vid: 1177, pid: 4096 }));

        assert_eq!(
            dog.on_attach(&DeviceInfo::usb(1177, 4096, "anything"), None),
            AttachDecision::Reopen { after: DEFAULT_ATTACH_DELAY }
        );
        assert_eq!(
            dog.on_attach(&DeviceInfo::usb(1177, 4097, "anything"), Some("anything")),
            AttachDecision::Ignore
        );
    }

    #[test]
    fn test_attach_without_ids_matches_selected_port() {
        let dog = watchdog(Some(DeviceIdentity { vid: 1177, pid: 4096 }));
        let selected = Some("PSS-A50 MIDI 1");

        assert!(matches!(
            dog.on_attach(&DeviceInfo::named("PSS-A50 MIDI 1"), selected),
            AttachDecision::Reopen { .. }
        ));
        assert_eq!(
            dog.on_attach(&DeviceInfo::named("Midi Through"), selected),
            AttachDecision::Ignore
        );
        // Nothing selectable: a name-only event cannot be attributed
        assert_eq!(
            dog.on_attach(&DeviceInfo::named("PSS-A50 MIDI 1"), None),
            AttachDecision::Ignore
        );
    }

    #[test]
    fn test_unconfigured_identity_surfaces_every_device() {
        let dog = watchdog(None);
        let device = DeviceInfo::usb(1, 2, "Some keyboard");

        assert_eq!(dog.on_attach(&device, None), AttachDecision::Candidate(device.clone()));
        assert_eq!(
            candidate_snippet(&device),
            "port_name: 'Some keyboard'\ndevice: { vid: 1, pid: 2 }"
        );
    }
}
