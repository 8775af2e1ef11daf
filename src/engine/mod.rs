//! Serialized processing context
//!
//! All mutable state lives in one [`Engine`] that processes commands and
//! timer expiries strictly one at a time. Other tasks talk to it through an
//! [`EngineHandle`].

mod actor;
mod commands;
mod handle;

pub use actor::Engine;
pub use commands::{EngineCommand, EngineStatus};
pub use handle::EngineHandle;

use std::time::Duration;

use crate::config::AppConfig;
use crate::debounce::{DebounceScope, DEFAULT_QUIET_PERIOD};
use crate::history::DEFAULT_NOISE_WINDOW;
use crate::mapping::{MappingEntry, DEFAULT_NOISE_CODES};
use crate::watchdog::{DeviceIdentity, DEFAULT_ATTACH_DELAY, DEFAULT_WATCHDOG_INTERVAL};

/// Everything the engine needs from the configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub port_name: Option<String>,
    pub port_index: Option<usize>,
    pub device: Option<DeviceIdentity>,
    pub noise_codes: Vec<u8>,
    pub quiet_period: Duration,
    pub noise_window: Duration,
    pub debounce_scope: DebounceScope,
    pub watchdog_interval: Duration,
    pub attach_delay: Duration,
    pub hotkeys: Vec<MappingEntry>,
}

impl EngineSettings {
    /// Collect the engine-relevant parts of a validated configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            port_name: config.midi.port_name.clone(),
            port_index: config.midi.port_index,
            device: config.midi.device,
            noise_codes: config.midi.noise_codes.clone(),
            quiet_period: config.debounce.quiet_period(),
            noise_window: config.debounce.noise_window(),
            debounce_scope: config.debounce.scope,
            watchdog_interval: config.midi.watchdog_interval(),
            attach_delay: config.midi.attach_delay(),
            hotkeys: config.hotkeys.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port_name: None,
            port_index: None,
            device: None,
            noise_codes: DEFAULT_NOISE_CODES.to_vec(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            noise_window: DEFAULT_NOISE_WINDOW,
            debounce_scope: DebounceScope::default(),
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            attach_delay: DEFAULT_ATTACH_DELAY,
            hotkeys: Vec::new(),
        }
    }
}
