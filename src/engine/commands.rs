//! Commands accepted by the engine

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::hotplug::DeviceInfo;

/// Messages processed one at a time by the engine loop
///
/// `Sample`, `Attach`, `Pause`, `Resume` and `Reopen` are fire-and-forget.
/// `ListPorts` and `Status` answer over a oneshot channel.
#[derive(Debug)]
pub enum EngineCommand {
    /// Raw message from the open input port
    Sample {
        /// Microseconds since the previous message on the port
        delta_us: u64,
        bytes: Vec<u8>,
        received_at: Instant,
    },

    /// A device appeared on the bus
    Attach(DeviceInfo),

    /// Stop acting on samples; the port stays open
    Pause,

    Resume,

    /// Close and reopen the input port now
    Reopen,

    ListPorts {
        response: oneshot::Sender<Vec<String>>,
    },

    Status {
        response: oneshot::Sender<EngineStatus>,
    },

    /// Close the port and leave the run loop
    Shutdown,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub port_open: bool,
    pub opened_port: Option<String>,
    pub paused: bool,
    /// Controls with a history entry
    pub controls_seen: usize,
    pub pending_debounces: usize,
    /// Samples that passed the pause gate and noise filter
    pub accepted_samples: u64,
    pub emitted_actions: u64,
    pub reopen_scheduled: bool,
}
