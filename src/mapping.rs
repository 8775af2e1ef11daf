//! Hotkey mapping table and message classification
//!
//! A mapping entry is either *discrete* (an exact byte pattern fires one
//! action) or *range* (a `(status, data1)` pair whose third byte is a
//! continuously varying value to be rescaled). Entries are matched in
//! configuration order and the first match wins.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::midi::{ControlKey, RawSample, ACTIVE_SENSING, TIMING_CLOCK};
use crate::scale::{ScaleError, ScaleRange, DEFAULT_MAX, DEFAULT_MIN, DEFAULT_TO_MAX, DEFAULT_TO_MIN};

/// Placeholder replaced by the scaled value in range payload templates
pub const PAYLOAD_PLACEHOLDER: &str = "{{payload}}";

/// Status codes treated as noise unless configured otherwise
pub const DEFAULT_NOISE_CODES: [u8; 2] = [TIMING_CLOCK, ACTIVE_SENSING];

/// Byte pattern of a mapping entry
///
/// `data1` and `data2` are `None` when the configured pattern is shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<u8>")]
pub struct MidiMatch {
    pub status: u8,
    pub data1: Option<u8>,
    pub data2: Option<u8>,
}

impl TryFrom<Vec<u8>> for MidiMatch {
    type Error = String;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        match bytes.as_slice() {
            [] => Err("midi pattern needs at least a status byte".to_string()),
            [status] => Ok(Self { status: *status, data1: None, data2: None }),
            [status, d1] => Ok(Self { status: *status, data1: Some(*d1), data2: None }),
            [status, d1, d2] => Ok(Self { status: *status, data1: Some(*d1), data2: Some(*d2) }),
            _ => Err(format!("midi pattern has {} bytes, at most 3 allowed", bytes.len())),
        }
    }
}

impl MidiMatch {
    /// Exact status and data1, data2 wildcarded when unspecified
    pub fn matches_triple(&self, sample: &RawSample) -> bool {
        self.status == sample.status
            && self.data1 == sample.data1
            && self.data2.map_or(true, |d2| Some(d2) == sample.data2)
    }

    /// Status and data1 only; a pattern without data1 never matches
    pub fn matches_pair(&self, sample: &RawSample) -> bool {
        self.status == sample.status && self.data1.is_some() && self.data1 == sample.data1
    }
}

impl fmt::Display for MidiMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: Vec<String> = [Some(self.status), self.data1, self.data2]
            .into_iter()
            .flatten()
            .map(|b| b.to_string())
            .collect();
        write!(f, "[{}]", bytes.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HotkeyType {
    #[default]
    Button,
    Range,
}

/// One `hotkeys:` entry as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct HotkeyConfig {
    #[serde(rename = "type", default)]
    pub kind: HotkeyType,
    pub midi: MidiMatch,
    #[serde(default)]
    pub keys: Option<String>,
    /// `[topic, payload]` shorthand
    #[serde(default)]
    pub mqtt: Option<(String, String)>,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default, alias = "mqtt_payload_template")]
    pub mqtt_payload: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub to_min: Option<f64>,
    #[serde(default)]
    pub to_max: Option<f64>,
}

/// Topic and payload (or payload template) to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTarget {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteMapping {
    pub midi: MidiMatch,
    pub keys: Option<String>,
    pub mqtt: Option<MqttTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeMapping {
    pub midi: MidiMatch,
    pub range: ScaleRange,
    pub keys: Option<String>,
    /// Payload is a template containing [`PAYLOAD_PLACEHOLDER`]
    pub mqtt: Option<MqttTarget>,
}

/// Read-only mapping table entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "HotkeyConfig")]
pub enum MappingEntry {
    Discrete(DiscreteMapping),
    Range(RangeMapping),
}

impl From<HotkeyConfig> for MappingEntry {
    fn from(cfg: HotkeyConfig) -> Self {
        let topic = cfg
            .mqtt_topic
            .or_else(|| cfg.mqtt.as_ref().map(|(topic, _)| topic.clone()));
        let payload = cfg
            .mqtt_payload
            .or_else(|| cfg.mqtt.map(|(_, payload)| payload));

        match cfg.kind {
            HotkeyType::Button => MappingEntry::Discrete(DiscreteMapping {
                midi: cfg.midi,
                keys: cfg.keys,
                mqtt: topic.map(|topic| MqttTarget {
                    topic,
                    payload: payload.unwrap_or_default(),
                }),
            }),
            HotkeyType::Range => MappingEntry::Range(RangeMapping {
                midi: cfg.midi,
                range: ScaleRange {
                    min: cfg.min.unwrap_or(DEFAULT_MIN),
                    max: cfg.max.unwrap_or(DEFAULT_MAX),
                    to_min: cfg.to_min.unwrap_or(DEFAULT_TO_MIN),
                    to_max: cfg.to_max.unwrap_or(DEFAULT_TO_MAX),
                },
                keys: cfg.keys,
                mqtt: topic.map(|topic| MqttTarget {
                    topic,
                    payload: payload.unwrap_or_else(|| PAYLOAD_PLACEHOLDER.to_string()),
                }),
            }),
        }
    }
}

impl MappingEntry {
    pub fn midi(&self) -> &MidiMatch {
        match self {
            MappingEntry::Discrete(m) => &m.midi,
            MappingEntry::Range(m) => &m.midi,
        }
    }

    /// Human readable configuration problems, if any
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            MappingEntry::Discrete(m) => {
                if m.keys.is_none() && m.mqtt.is_none() {
                    problems.push(format!("button {} has neither keys nor mqtt", m.midi));
                }
            }
            MappingEntry::Range(m) => {
                if m.midi.data1.is_none() {
                    problems.push(format!("range {} needs [status, data1]", m.midi));
                }
                if m.midi.data2.is_some() {
                    problems.push(format!("range {} ignores its third byte", m.midi));
                }
                if m.range.min == m.range.max {
                    problems.push(format!("range {} has min == max ({})", m.midi, m.range.min));
                }
                if m.keys.is_none() && m.mqtt.is_none() {
                    problems.push(format!("range {} has neither keys nor mqtt", m.midi));
                }
            }
        }
        problems
    }
}

/// Resolved action handed to the actuators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub source: ControlKey,
    pub keys: Option<String>,
    pub mqtt_topic: Option<String>,
    pub mqtt_payload: Option<String>,
}

impl ResolvedAction {
    pub fn is_empty(&self) -> bool {
        self.keys.is_none() && self.mqtt_topic.is_none()
    }
}

impl fmt::Display for ResolvedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.source)?;
        if let Some(keys) = &self.keys {
            write!(f, " keys='{}'", keys)?;
        }
        if let Some(topic) = &self.mqtt_topic {
            write!(f, " mqtt={} '{}'", topic, self.mqtt_payload.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

impl DiscreteMapping {
    pub fn resolve(&self, source: ControlKey) -> ResolvedAction {
        ResolvedAction {
            source,
            keys: self.keys.clone(),
            mqtt_topic: self.mqtt.as_ref().map(|m| m.topic.clone()),
            mqtt_payload: self.mqtt.as_ref().map(|m| m.payload.clone()),
        }
    }
}

impl RangeMapping {
    /// Scale `raw_value` and substitute it into the payload template
    pub fn resolve(&self, source: ControlKey, raw_value: u8) -> Result<ResolvedAction, ScaleError> {
        let value = self.range.apply(raw_value as f64)?;
        Ok(ResolvedAction {
            source,
            keys: self.keys.clone(),
            mqtt_topic: self.mqtt.as_ref().map(|m| m.topic.clone()),
            mqtt_payload: self
                .mqtt
                .as_ref()
                .map(|m| render_payload(&m.payload, value)),
        })
    }
}

/// Replace every placeholder occurrence with `value`
pub fn render_payload(template: &str, value: i64) -> String {
    template.replace(PAYLOAD_PLACEHOLDER, &value.to_string())
}

/// Range entry hit by a sample, to be debounced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeHit {
    /// Position of the entry in the mapping table
    pub index: usize,
    pub key: ControlKey,
    pub raw_value: u8,
}

/// Outcome of classifying one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub discrete: Option<ResolvedAction>,
    pub range: Option<RangeHit>,
}

/// Matches samples against the mapping table
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    entries: Vec<MappingEntry>,
    noise_codes: BTreeSet<u8>,
}

impl MessageClassifier {
    /// Classifier over `entries`, dropping samples whose status is in `noise_codes`
    pub fn new(entries: Vec<MappingEntry>, noise_codes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            entries,
            noise_codes: noise_codes.into_iter().collect(),
        }
    }

    pub fn is_noise(&self, sample: &RawSample) -> bool {
        self.noise_codes.contains(&sample.status)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Range entry at `index` of the mapping table
    pub fn range(&self, index: usize) -> Option<&RangeMapping> {
        match self.entries.get(index) {
            Some(MappingEntry::Range(m)) => Some(m),
            _ => None,
        }
    }

    /// Scan discrete and range entries independently, first match wins in each
    pub fn classify(&self, sample: &RawSample) -> Classification {
        let key = sample.control_key();

        let discrete = self.entries.iter().find_map(|entry| match entry {
            MappingEntry::Discrete(m) if m.midi.matches_triple(sample) => Some(m.resolve(key)),
            _ => None,
        });

        let range = self
            .entries
            .iter()
            .enumerate()
            .find_map(|(index, entry)| match entry {
                MappingEntry::Range(m) if m.midi.matches_pair(sample) => Some(index),
                _ => None,
            })
            .and_then(|index| {
                sample.data2.map(|raw_value| RangeHit {
                    index,
                    key,
                    raw_value,
                })
            });

        Classification { discrete, range }
    }
}
