//! midi-hotkeys - MIDI control surface to hotkeys and MQTT
//!
//! Buttons fire keystrokes or MQTT messages immediately; knobs and faders are
//! debounced, checked against recent history to reject isolated glitches,
//! rescaled and published once the control comes to rest. A watchdog and
//! hot-plug events keep the input port open across device disconnects.

pub mod actuators;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod history;
pub mod hotplug;
pub mod mapping;
pub mod midi;
pub mod port;
pub mod scale;
pub mod watchdog;

pub use config::AppConfig;
pub use engine::{Engine, EngineHandle, EngineSettings, EngineStatus};
pub use mapping::ResolvedAction;
