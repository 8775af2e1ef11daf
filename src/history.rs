//! Per-control observation history
//!
//! Remembers when each control was last seen so that an isolated tick (a
//! single sample with no corroborating neighbour inside the noise window) can
//! be told apart from a deliberate knob movement.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::midi::{ControlKey, RawSample};

/// Default span within which two samples of one control are considered related
pub const DEFAULT_NOISE_WINDOW: Duration = Duration::from_millis(1000);

/// History state of one control
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub last_sample: RawSample,
    pub time_of_last: Instant,
    /// Only set once a second sample arrived within the noise window
    pub time_of_previous: Option<Instant>,
}

impl HistoryEntry {
    /// Whether the control has been seen at least twice within the noise window
    pub fn is_corroborated(&self) -> bool {
        self.time_of_previous.is_some()
    }
}

/// Rolling memory of the last two observations per control
#[derive(Debug)]
pub struct HistoryTracker {
    noise_window: Duration,
    entries: HashMap<ControlKey, HistoryEntry>,
}

impl HistoryTracker {
    /// Empty tracker; gaps longer than `noise_window` reset a control
    pub fn new(noise_window: Duration) -> Self {
        Self {
            noise_window,
            entries: HashMap::new(),
        }
    }

    pub fn noise_window(&self) -> Duration {
        self.noise_window
    }

    /// Record an observation of `sample` at `now`
    pub fn record(&mut self, sample: RawSample, now: Instant) {
        let noise_window = self.noise_window;

        match self.entries.get_mut(&sample.control_key()) {
            Some(entry) => {
                // A long gap makes this a fresh first sighting
                let previous = if now.saturating_duration_since(entry.time_of_last) > noise_window {
                    None
                } else {
                    Some(entry.time_of_last)
                };

                entry.time_of_previous = previous;
                entry.time_of_last = now;
                entry.last_sample = sample;
            }
            None => {
                self.entries.insert(
                    sample.control_key(),
                    HistoryEntry {
                        last_sample: sample,
                        time_of_last: now,
                        time_of_previous: None,
                    },
                );
            }
        }
    }

    pub fn lookup(&self, key: &ControlKey) -> Option<&HistoryEntry> {
        self.entries.get(key)
    }

    /// Number of distinct controls seen so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_WINDOW)
    }
}
