//! EngineHandle - Public API for the engine
//!
//! Fire-and-forget methods for the hot path, async methods with oneshot
//! channels for queries. Every method is a no-op once the engine is gone.

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::commands::{EngineCommand, EngineStatus};
use crate::hotplug::DeviceInfo;

#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Feed a raw message as if it came from the input port
    pub fn submit_sample(&self, delta_us: u64, bytes: &[u8]) {
        let _ = self.cmd_tx.send(EngineCommand::Sample {
            delta_us,
            bytes: bytes.to_vec(),
            received_at: Instant::now(),
        });
    }

    /// Report a hot-plug attach; the watchdog decides whether to reopen
    pub fn device_attached(&self, device: DeviceInfo) {
        let _ = self.cmd_tx.send(EngineCommand::Attach(device));
    }

    /// Ignore incoming samples and pending debounces; the port stays open
    pub fn pause(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Pause);
    }

    /// Undo [`EngineHandle::pause`]
    pub fn resume(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Resume);
    }

    /// Close and reopen the configured input port
    pub fn reopen(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Reopen);
    }

    /// Stop the engine and close the port
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }

    /// Input port names as currently enumerated by the driver
    pub async fn list_ports(&self) -> Vec<String> {
        let (response, rx) = oneshot::channel();
        if self.cmd_tx.send(EngineCommand::ListPorts { response }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Current engine state, `None` if the engine has stopped
    pub async fn status(&self) -> Option<EngineStatus> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(EngineCommand::Status { response }).ok()?;
        rx.await.ok()
    }

    /// True once the engine has stopped
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}
