//! Configuration management for midi-hotkeys
//!
//! Handles loading, parsing and validating the YAML configuration file. The
//! configuration is read once at startup and never changes afterwards.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;

use crate::debounce::{DebounceScope, DEFAULT_QUIET_PERIOD};
use crate::history::DEFAULT_NOISE_WINDOW;
use crate::hotplug::DEFAULT_SCAN_INTERVAL;
use crate::mapping::{MappingEntry, DEFAULT_NOISE_CODES};
use crate::watchdog::{DeviceIdentity, DEFAULT_ATTACH_DELAY, DEFAULT_WATCHDOG_INTERVAL};

/// Upper bound for every `*_ms` setting (one week)
pub const MAX_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub midi: MidiConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub keys: Option<KeysConfig>,
    #[serde(default)]
    pub hotkeys: Vec<MappingEntry>,
}

/// MIDI input and device configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MidiConfig {
    /// Exact port name, preferred over `port_index`
    #[serde(default)]
    pub port_name: Option<String>,
    #[serde(default, alias = "port_num")]
    pub port_index: Option<usize>,
    /// USB identity for hot-plug reconnects
    #[serde(default)]
    pub device: Option<DeviceIdentity>,
    #[serde(default = "default_noise_codes")]
    pub noise_codes: Vec<u8>,
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "default_attach_delay_ms")]
    pub attach_delay_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

/// Range control debouncing
#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_quiet_ms")]
    pub quiet_ms: u64,
    #[serde(default = "default_noise_window_ms")]
    pub noise_window_ms: u64,
    #[serde(default)]
    pub scope: DebounceScope,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_ms: default_quiet_ms(),
            noise_window_ms: default_noise_window_ms(),
            scope: DebounceScope::default(),
        }
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Topic accepting `pause` / `resume` commands
    #[serde(default)]
    pub control_topic: Option<String>,
}

/// Keystroke injection override
///
/// Without this section chords are typed through the native input API.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    /// Program and arguments; `{{keys}}` is replaced by the chord, e.g.
    /// `["xdotool", "key", "{{keys}}"]`
    pub command: Vec<String>,
}

impl MidiConfig {
    /// Silence after which the port is reopened
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn attach_delay(&self) -> Duration {
        Duration::from_millis(self.attach_delay_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl DebounceConfig {
    /// Stillness required before a range value fires
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }

    pub fn noise_window(&self) -> Duration {
        Duration::from_millis(self.noise_window_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    ///
    /// Problems with individual hotkeys are not fatal; see [`AppConfig::warnings`].
    pub fn validate(&self) -> Result<()> {
        if self.midi.watchdog_interval_ms == 0 {
            anyhow::bail!("midi.watchdog_interval_ms must be greater than 0");
        }
        if self.midi.scan_interval_ms == 0 {
            anyhow::bail!("midi.scan_interval_ms must be greater than 0");
        }

        let durations = [
            ("midi.watchdog_interval_ms", self.midi.watchdog_interval_ms),
            ("midi.attach_delay_ms", self.midi.attach_delay_ms),
            ("midi.scan_interval_ms", self.midi.scan_interval_ms),
            ("debounce.quiet_ms", self.debounce.quiet_ms),
            ("debounce.noise_window_ms", self.debounce.noise_window_ms),
        ];
        for (name, value) in durations {
            if value > MAX_DURATION_MS {
                anyhow::bail!("{} must be at most {} (one week), got {}", name, MAX_DURATION_MS, value);
            }
        }
        if let Some(keys) = &self.keys {
            if keys.command.is_empty() {
                anyhow::bail!("keys.command needs at least a program name");
            }
        }
        Ok(())
    }

    /// Non-fatal configuration problems, one line each
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.midi.port_name.is_none() && self.midi.port_index.is_none() {
            warnings.push("midi: neither port_name nor port_index is set, no port will open".to_string());
        }
        if self.hotkeys.is_empty() {
            warnings.push("hotkeys: no mappings configured".to_string());
        }

        for (idx, entry) in self.hotkeys.iter().enumerate() {
            for problem in entry.problems() {
                warnings.push(format!("hotkeys[{}]: {}", idx, problem));
            }
        }

        let uses_mqtt = self.hotkeys.iter().any(|entry| match entry {
            MappingEntry::Discrete(m) => m.mqtt.is_some(),
            MappingEntry::Range(m) => m.mqtt.is_some(),
        });
        if uses_mqtt && self.mqtt.is_none() {
            warnings.push("hotkeys publish to MQTT but no mqtt section is configured".to_string());
        }

        warnings
    }
}

// Default value functions
fn default_noise_codes() -> Vec<u8> { DEFAULT_NOISE_CODES.to_vec() }
fn default_watchdog_interval_ms() -> u64 { DEFAULT_WATCHDOG_INTERVAL.as_millis() as u64 }
fn default_attach_delay_ms() -> u64 { DEFAULT_ATTACH_DELAY.as_millis() as u64 }
fn default_scan_interval_ms() -> u64 { DEFAULT_SCAN_INTERVAL.as_millis() as u64 }
fn default_quiet_ms() -> u64 { DEFAULT_QUIET_PERIOD.as_millis() as u64 }
fn default_noise_window_ms() -> u64 { DEFAULT_NOISE_WINDOW.as_millis() as u64 }
fn default_mqtt_host() -> String { "localhost".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_client_id() -> String { "midi-hotkeys".to_string() }
fn default_keep_alive_secs() -> u64 { 5 }
