//! Engine - single owner of all processing state
//!
//! ```text
//!  input port sink ─┐
//!  hot-plug events ─┼─> cmd_rx ─┐
//!  EngineHandle ────┘           │
//!                               v
//!     watchdog tick ──────> [ Engine ] ──> actions_tx ──> dispatcher
//!     debounce deadline ──>     │
//!     attach reopen ──────>     v
//!                          InputPort (at most one open connection)
//! ```

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::commands::{EngineCommand, EngineStatus};
use super::handle::EngineHandle;
use super::EngineSettings;
use crate::debounce::{settle, DebounceCoalescer, Settled};
use crate::history::HistoryTracker;
use crate::hotplug::DeviceInfo;
use crate::mapping::{Classification, MessageClassifier, ResolvedAction};
use crate::midi::{format_hex, RawSample};
use crate::port::{InputPort, PortBackend, SampleSink};
use crate::watchdog::{candidate_snippet, AttachDecision, ConnectivityState, Watchdog};

pub struct Engine<B: PortBackend> {
    classifier: MessageClassifier,
    history: HistoryTracker,
    debounce: DebounceCoalescer,
    watchdog: Watchdog,
    connectivity: ConnectivityState,
    port: InputPort<B>,

    /// Pending attach-triggered reopen
    reopen_at: Option<Instant>,

    actions_tx: mpsc::UnboundedSender<ResolvedAction>,
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,

    accepted_samples: u64,
    emitted_actions: u64,
}

impl<B: PortBackend> Engine<B> {
    /// Build an engine around `backend`; resolved actions are sent to `actions_tx`
    pub fn new(
        settings: EngineSettings,
        backend: B,
        actions_tx: mpsc::UnboundedSender<ResolvedAction>,
    ) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = EngineHandle::new(cmd_tx.clone());

        let engine = Self {
            classifier: MessageClassifier::new(settings.hotkeys, settings.noise_codes),
            history: HistoryTracker::new(settings.noise_window),
            debounce: DebounceCoalescer::new(settings.quiet_period, settings.debounce_scope),
            watchdog: Watchdog::new(settings.watchdog_interval, settings.attach_delay, settings.device),
            connectivity: ConnectivityState::new(Instant::now()),
            port: InputPort::new(backend, settings.port_name, settings.port_index),
            reopen_at: None,
            actions_tx,
            cmd_tx,
            cmd_rx,
            accepted_samples: 0,
            emitted_actions: 0,
        };

        (engine, handle)
    }

    /// Open the port and process commands and timers until `shutdown`
    /// resolves or a `Shutdown` command arrives
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let now = Instant::now();
        self.connectivity = ConnectivityState::new(now);
        self.reopen();

        let period = self.watchdog.interval();
        let mut watchdog = tokio::time::interval_at(now + period, period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "✅ Engine started ({} hotkeys, watchdog every {:?})",
            self.classifier.entries().len(),
            period
        );

        loop {
            let debounce_deadline = self.debounce.next_deadline();
            let reopen_at = self.reopen_at;

            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown signal received by engine");
                    break;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                _ = watchdog.tick() => self.watchdog_tick(Instant::now()),
                _ = sleep_until(debounce_deadline) => self.fire_due(Instant::now()),
                _ = sleep_until(reopen_at) => {
                    self.reopen_at = None;
                    info!("🔄 Reopening MIDI input after device attach");
                    self.reopen();
                }
            }
        }

        self.port.close();
        self.connectivity.port_open = false;
        info!(
            "🛑 Engine stopped ({} samples accepted, {} actions emitted)",
            self.accepted_samples, self.emitted_actions
        );
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Sample {
                delta_us,
                bytes,
                received_at,
            } => self.handle_sample(delta_us, &bytes, received_at),
            EngineCommand::Attach(device) => self.on_attach(device, Instant::now()),
            EngineCommand::Pause => {
                if !self.connectivity.paused {
                    info!("Paused: incoming samples are ignored");
                }
                self.connectivity.paused = true;
            }
            EngineCommand::Resume => {
                if self.connectivity.paused {
                    info!("Resumed");
                }
                self.connectivity.paused = false;
            }
            EngineCommand::Reopen => self.reopen(),
            EngineCommand::ListPorts { response } => {
                let ports = self.port.enumerate_ports().unwrap_or_else(|e| {
                    warn!("Failed to enumerate MIDI inputs: {:#}", e);
                    Vec::new()
                });
                let _ = response.send(ports);
            }
            EngineCommand::Status { response } => {
                let _ = response.send(self.status());
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// Pause gate, noise filter, history, then classification
    fn handle_sample(&mut self, delta_us: u64, bytes: &[u8], now: Instant) {
        if self.connectivity.paused {
            trace!("Paused, dropping {}", format_hex(bytes));
            return;
        }

        let Some(sample) = RawSample::from_bytes(bytes) else {
            return;
        };

        if self.classifier.is_noise(&sample) {
            trace!("Discarding noise code {}", sample.status);
            return;
        }

        self.connectivity.accept(now);
        self.accepted_samples += 1;
        debug!(
            "MIDI in: {} ({}) [{}] +{}µs",
            sample,
            sample.kind(),
            format_hex(bytes),
            delta_us
        );

        self.history.record(sample, now);

        let Classification { discrete, range } = self.classifier.classify(&sample);
        if let Some(action) = discrete {
            self.emit(action);
        }
        if let Some(hit) = range {
            self.debounce.schedule(hit, now);
        }
    }

    fn fire_due(&mut self, now: Instant) {
        for hit in self.debounce.take_due(now) {
            if self.connectivity.paused {
                debug!("Paused, dropping debounced value of {}", hit.key);
                continue;
            }

            match settle(hit, &self.history, &self.classifier) {
                Settled::Emit(action) => self.emit(action),
                Settled::Isolated(hit) => {
                    info!("Discarding isolated signal from {} (value {})", hit.key, hit.raw_value);
                }
                Settled::Misconfigured { hit, error } => {
                    warn!("hotkeys[{}] for {}: {}", hit.index, hit.key, error);
                }
            }
        }
    }

    fn emit(&mut self, action: ResolvedAction) {
        if action.is_empty() {
            debug!("Matched {} but the mapping has no action", action.source);
            return;
        }

        debug!("Action {}", action);
        self.emitted_actions += 1;
        if self.actions_tx.send(action).is_err() {
            warn!("Action dispatcher is gone, action dropped");
        }
    }

    fn watchdog_tick(&mut self, now: Instant) {
        if self.watchdog.is_stale(&self.connectivity, now) {
            info!(
                "⏳ No MIDI input for {:?}, reopening port",
                now.saturating_duration_since(self.connectivity.last_accepted_at)
            );
            self.reopen();
        } else {
            trace!("Watchdog: input alive");
        }
    }

    fn on_attach(&mut self, device: DeviceInfo, now: Instant) {
        let selected = if device.has_ids() {
            None
        } else {
            self.port.resolve_name()
        };

        match self.watchdog.on_attach(&device, selected.as_deref()) {
            AttachDecision::Reopen { after } => {
                info!("🔌 Configured device attached: {}", device);
                self.reopen_at = Some(now + after);
            }
            AttachDecision::Candidate(device) => {
                warn!(
                    "Device attached: {}. To follow it, add to the midi section:\n{}",
                    device,
                    candidate_snippet(&device)
                );
            }
            AttachDecision::Ignore => debug!("Ignoring attach of {}", device),
        }
    }

    /// Close any open port, then open the configured one
    fn reopen(&mut self) {
        let sink = self.sample_sink();
        match self.port.open(sink) {
            Ok(name) => {
                self.connectivity.port_open = true;
                info!("🎧 Listening on MIDI input '{}'", name);
            }
            Err(e) => {
                self.connectivity.port_open = false;
                warn!("MIDI input not opened: {}", e);
            }
        }
    }

    fn sample_sink(&self) -> SampleSink {
        let cmd_tx = self.cmd_tx.clone();
        Arc::new(move |delta_us, bytes| {
            let _ = cmd_tx.send(EngineCommand::Sample {
                delta_us,
                bytes: bytes.to_vec(),
                received_at: Instant::now(),
            });
        })
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            port_open: self.connectivity.port_open,
            opened_port: self.port.opened_name().map(str::to_string),
            paused: self.connectivity.paused,
            controls_seen: self.history.len(),
            pending_debounces: self.debounce.pending_len(),
            accepted_samples: self.accepted_samples,
            emitted_actions: self.emitted_actions,
            reopen_scheduled: self.reopen_at.is_some(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
