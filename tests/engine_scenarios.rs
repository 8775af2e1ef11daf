//! End-to-end behaviour of the engine through its public handle, with a
//! virtual MIDI backend and paused time.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use midi_hotkeys::config::AppConfig;
use midi_hotkeys::engine::{Engine, EngineHandle, EngineSettings};
use midi_hotkeys::hotplug::{
    forward_to_engine, DeviceInfo, DeviceScanner, PortScanner, ScanMonitor, DEFAULT_SCAN_INTERVAL,
};
use midi_hotkeys::port::VirtualBackend;
use midi_hotkeys::ResolvedAction;

const CONFIG: &str = r#"
midi:
  port_name: "PSS-A50"
  device: { vid: 1177, pid: 4096 }
hotkeys:
  - midi: [176, 7, 127]
    keys: "ctrl+shift a"
  - type: range
    midi: [176, 10]
    min: 0
    max: 127
    to_min: 0
    to_max: 10
    mqtt_topic: "t"
    mqtt_payload_template: "val={{payload}}"
"#;

/// Controller selected by position only, followed by its USB identity
const INDEXED_CONFIG: &str = r#"
midi:
  port_index: 1
  device: { vid: 1177, pid: 4096 }
hotkeys:
  - midi: [176, 7, 127]
    keys: "ctrl+shift a"
"#;

struct Rig {
    backend: VirtualBackend,
    handle: EngineHandle,
    actions: mpsc::UnboundedReceiver<ResolvedAction>,
}

impl Rig {
    fn start() -> Self {
        Self::start_with(CONFIG)
    }

    fn start_with(yaml: &str) -> Self {
        let config = AppConfig::from_yaml(yaml).unwrap();
        let backend = VirtualBackend::new(["Midi Through", "PSS-A50"]);
        let (actions_tx, actions) = mpsc::unbounded_channel();
        let (engine, handle) = Engine::new(
            EngineSettings::from_config(&config),
            backend.clone(),
            actions_tx,
        );
        tokio::spawn(engine.run(std::future::pending()));
        Self {
            backend,
            handle,
            actions,
        }
    }

    /// Inject through the open port and wait until the engine has processed it
    async fn play(&self, bytes: &[u8]) {
        assert!(self.backend.inject(bytes), "port is not open");
        self.handle.status().await;
    }

    fn drain(&mut self) -> Vec<ResolvedAction> {
        let mut out = Vec::new();
        while let Ok(action) = self.actions.try_recv() {
            out.push(action);
        }
        out
    }
}

#[tokio::test(start_paused = true)]
async fn noise_codes_leave_no_trace() {
    let mut rig = Rig::start();
    rig.handle.status().await;

    rig.play(&[248]).await;
    rig.play(&[254]).await;
    sleep(Duration::from_secs(2)).await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.controls_seen, 0);
    assert_eq!(status.accepted_samples, 0);
    assert!(rig.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn button_fires_immediately() {
    let mut rig = Rig::start();
    rig.handle.status().await;

    rig.play(&[176, 7, 127]).await;

    let actions = rig.drain();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].keys.as_deref(), Some("ctrl+shift a"));
    assert_eq!(actions[0].mqtt_topic, None);
}

#[tokio::test(start_paused = true)]
async fn knob_emits_last_value_after_quiet_period() {
    let mut rig = Rig::start();
    rig.handle.status().await;

    rig.play(&[176, 10, 64]).await;
    sleep(Duration::from_millis(100)).await;
    rig.play(&[176, 10, 100]).await;

    sleep(Duration::from_millis(450)).await;
    assert!(rig.drain().is_empty(), "fired before the quiet period elapsed");

    sleep(Duration::from_millis(100)).await;
    let actions = rig.drain();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].mqtt_topic.as_deref(), Some("t"));
    assert_eq!(actions[0].mqtt_payload.as_deref(), Some("val=8"));

    sleep(Duration::from_secs(5)).await;
    assert!(rig.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn isolated_knob_tick_is_discarded() {
    let mut rig = Rig::start();
    rig.handle.status().await;

    rig.play(&[176, 10, 64]).await;
    sleep(Duration::from_secs(2)).await;

    assert!(rig.drain().is_empty());
    assert_eq!(rig.handle.status().await.unwrap().pending_debounces, 0);
}

#[tokio::test(start_paused = true)]
async fn samples_further_apart_than_noise_window_are_isolated() {
    let mut rig = Rig::start();
    rig.handle.status().await;

    rig.play(&[176, 10, 10]).await;
    sleep(Duration::from_millis(1500)).await;
    rig.play(&[176, 10, 20]).await;
    sleep(Duration::from_secs(1)).await;

    assert!(rig.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn paused_engine_ignores_everything() {
    let mut rig = Rig::start();
    rig.handle.pause();
    rig.handle.status().await;

    rig.play(&[176, 7, 127]).await;
    rig.play(&[176, 10, 1]).await;
    rig.play(&[176, 10, 2]).await;
    sleep(Duration::from_secs(1)).await;

    let status = rig.handle.status().await.unwrap();
    assert!(status.paused);
    assert!(status.port_open, "pausing must not close the port");
    assert_eq!(status.controls_seen, 0);
    assert!(rig.drain().is_empty());

    rig.handle.resume();
    rig.play(&[176, 7, 127]).await;
    assert_eq!(rig.drain().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_reopens_silent_port() {
    let rig = Rig::start();
    rig.handle.status().await;
    assert_eq!(rig.backend.open_calls(), 1);

    // First tick at 600 s: silence has not yet exceeded the interval
    sleep(Duration::from_secs(601)).await;
    assert_eq!(rig.backend.open_calls(), 1);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(rig.backend.open_calls(), 2);
    assert_eq!(rig.backend.max_simultaneous(), 1);
    assert!(rig.handle.status().await.unwrap().port_open);
}

#[tokio::test(start_paused = true)]
async fn watchdog_leaves_active_port_alone() {
    let rig = Rig::start();
    rig.handle.status().await;

    for _ in 0..8 {
        sleep(Duration::from_secs(300)).await;
        rig.play(&[144, 60, 100]).await;
    }

    assert_eq!(rig.backend.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_of_configured_device_reopens_after_delay() {
    let rig = Rig::start();
    rig.handle.status().await;

    rig.handle.device_attached(DeviceInfo::usb(1177, 4096, "PSS-A50"));
    sleep(Duration::from_millis(400)).await;
    assert_eq!(rig.backend.open_calls(), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.backend.open_calls(), 2);
    assert_eq!(rig.backend.close_calls(), 1);
    assert_eq!(rig.backend.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn port_reappearing_is_picked_up_on_reopen() {
    let mut rig = Rig::start();
    rig.backend.set_ports(["Midi Through"]);
    rig.handle.reopen();
    assert!(!rig.handle.status().await.unwrap().port_open);

    rig.backend.set_ports(["Midi Through", "PSS-A50"]);
    rig.handle.device_attached(DeviceInfo::named("PSS-A50"));
    sleep(Duration::from_secs(1)).await;

    assert!(rig.handle.status().await.unwrap().port_open);
    rig.play(&[176, 7, 127]).await;
    assert_eq!(rig.drain().len(), 1);
}

/// USB bus whose device list the test edits
#[derive(Clone, Default)]
struct FakeUsbBus {
    devices: Arc<Mutex<Vec<DeviceInfo>>>,
}

impl DeviceScanner for FakeUsbBus {
    fn name(&self) -> &str {
        "fake usb"
    }

    fn scan(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.lock().clone())
    }
}

fn controller() -> DeviceInfo {
    DeviceInfo::usb(1177, 4096, "PSS-A50")
}

#[tokio::test(start_paused = true)]
async fn usb_replug_reopens_port_selected_by_index() {
    let mut rig = Rig::start_with(INDEXED_CONFIG);
    rig.handle.status().await;
    assert_eq!(rig.backend.open_calls(), 1);

    let bus = FakeUsbBus::default();
    bus.devices.lock().push(controller());
    let (tx, rx) = mpsc::channel(16);
    let _monitor = ScanMonitor::new(bus.clone(), DEFAULT_SCAN_INTERVAL).spawn(tx);
    let _forward = forward_to_engine(rx, rig.handle.clone());
    sleep(Duration::from_millis(10)).await;

    bus.devices.lock().clear();
    rig.backend.set_ports(["Midi Through"]);
    sleep(DEFAULT_SCAN_INTERVAL).await;
    assert_eq!(rig.backend.open_calls(), 1);

    bus.devices.lock().push(controller());
    rig.backend.set_ports(["Midi Through", "PSS-A50"]);
    sleep(DEFAULT_SCAN_INTERVAL + Duration::from_secs(1)).await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(rig.backend.open_calls(), 2, "configured device re-attached but no reopen happened");
    assert!(!status.reopen_scheduled);
    assert_eq!(status.opened_port.as_deref(), Some("PSS-A50"));

    rig.play(&[176, 7, 127]).await;
    assert_eq!(rig.drain().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn port_list_replug_reopens_port_selected_by_index() {
    let rig = Rig::start_with(INDEXED_CONFIG);
    rig.handle.status().await;

    let (tx, rx) = mpsc::channel(16);
    let scanner = PortScanner::new(rig.backend.clone());
    let _monitor = ScanMonitor::new(scanner, DEFAULT_SCAN_INTERVAL).spawn(tx);
    let _forward = forward_to_engine(rx, rig.handle.clone());
    sleep(Duration::from_millis(10)).await;

    rig.backend.set_ports(["Midi Through"]);
    sleep(DEFAULT_SCAN_INTERVAL).await;
    rig.backend.set_ports(["Midi Through", "PSS-A50"]);
    sleep(DEFAULT_SCAN_INTERVAL + Duration::from_secs(1)).await;

    assert_eq!(rig.backend.open_calls(), 2);
    assert!(rig.handle.status().await.unwrap().port_open);
}
