//! Trailing-edge debouncing of range controls
//!
//! Every sample of a range control re-arms a quiet-period timer; only the
//! arguments of the last call survive to fire once the control has been
//! still for the whole quiet period. When the timer fires, the history of the
//! control decides whether the burst was real input or an isolated glitch.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::history::HistoryTracker;
use crate::mapping::{MessageClassifier, RangeHit, ResolvedAction};
use crate::midi::ControlKey;
use crate::scale::ScaleError;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Whether controls share one timer or get one each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DebounceScope {
    /// Independent timer per control key
    #[default]
    PerControl,
    /// One timer for the whole process; a sample on any range control
    /// replaces whatever was pending
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Shared,
    Control(ControlKey),
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    hit: RangeHit,
    deadline: Instant,
}

#[derive(Debug)]
pub struct DebounceCoalescer {
    quiet_period: Duration,
    scope: DebounceScope,
    pending: HashMap<Slot, Pending>,
}

impl DebounceCoalescer {
    /// Empty coalescer firing `quiet_period` after the last sample
    pub fn new(quiet_period: Duration, scope: DebounceScope) -> Self {
        Self {
            quiet_period,
            scope,
            pending: HashMap::new(),
        }
    }

    /// Arm (or re-arm) the timer for `hit`, replacing any earlier arguments
    pub fn schedule(&mut self, hit: RangeHit, now: Instant) {
        let slot = match self.scope {
            DebounceScope::Global => Slot::Shared,
            DebounceScope::PerControl => Slot::Control(hit.key),
        };

        self.pending.insert(
            slot,
            Pending {
                hit,
                deadline: now + self.quiet_period,
            },
        );
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every hit whose quiet period has elapsed, oldest first
    pub fn take_due(&mut self, now: Instant) -> Vec<RangeHit> {
        let mut due: Vec<Pending> = Vec::new();
        self.pending.retain(|_, pending| {
            if pending.deadline <= now {
                due.push(*pending);
                false
            } else {
                true
            }
        });

        due.sort_by_key(|p| p.deadline);
        due.into_iter().map(|p| p.hit).collect()
    }

    /// Timers currently armed
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for DebounceCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD, DebounceScope::default())
    }
}

/// What became of a debounced hit once its timer elapsed
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Emit(ResolvedAction),
    /// Control seen only once within the noise window
    Isolated(RangeHit),
    /// Mapping entry cannot scale (e.g. `min == max`)
    Misconfigured { hit: RangeHit, error: ScaleError },
}

/// Decide whether a fired hit is trusted and resolve it to an action
pub fn settle(hit: RangeHit, history: &HistoryTracker, classifier: &MessageClassifier) -> Settled {
    let corroborated = history
        .lookup(&hit.key)
        .map(|entry| entry.is_corroborated())
        .unwrap_or(false);
    if !corroborated {
        return Settled::Isolated(hit);
    }

    // Hits come from this classifier, whose table never changes
    let mapping = classifier.range(hit.index);
    debug_assert!(mapping.is_some(), "hotkeys[{}] is not a range entry", hit.index);
    let Some(mapping) = mapping else {
        return Settled::Isolated(hit);
    };

    match mapping.resolve(hit.key, hit.raw_value) {
        Ok(action) => Settled::Emit(action),
        Err(error) => Settled::Misconfigured { hit, error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingEntry, DEFAULT_NOISE_CODES};
    use crate::midi::RawSample;

    fn hit(data1: u8, raw_value: u8) -> RangeHit {
        RangeHit {
            index: 0,
            key: ControlKey::new(176, data1),
            raw_value,
        }
    }

    fn range_classifier(yaml: &str) -> MessageClassifier {
        let entries: Vec<MappingEntry> = serde_yaml::from_str(yaml).unwrap();
        MessageClassifier::new(entries, DEFAULT_NOISE_CODES)
    }

    #[test]
    fn test_last_call_wins() {
        let mut debounce = DebounceCoalescer::default();
        let t0 = Instant::now();

        debounce.schedule(hit(10, 64), t0);
        debounce.schedule(hit(10, 100), t0 + Duration::from_millis(200));

        assert!(debounce.take_due(t0 + Duration::from_millis(600)).is_empty());
        assert_eq!(
            debounce.take_due(t0 + Duration::from_millis(700)),
            vec![hit(10, 100)]
        );
        assert_eq!(debounce.pending_len(), 0);
    }

    #[test]
    fn test_next_deadline_tracks_rearm() {
        let mut debounce = DebounceCoalescer::default();
        let t0 = Instant::now();
        assert_eq!(debounce.next_deadline(), None);

        debounce.schedule(hit(10, 1), t0);
        assert_eq!(debounce.next_deadline(), Some(t0 + DEFAULT_QUIET_PERIOD));

        let t1 = t0 + Duration::from_millis(300);
        debounce.schedule(hit(10, 2), t1);
        assert_eq!(debounce.next_deadline(), Some(t1 + DEFAULT_QUIET_PERIOD));
    }

    #[test]
    fn test_per_control_timers_are_independent() {
        let mut debounce = DebounceCoalescer::new(DEFAULT_QUIET_PERIOD, DebounceScope::PerControl);
        let t0 = Instant::now();

        debounce.schedule(hit(10, 5), t0);
        debounce.schedule(hit(11, 6), t0 + Duration::from_millis(100));

        let due = debounce.take_due(t0 + Duration::from_millis(600));
        assert_eq!(due, vec![hit(10, 5), hit(11, 6)]);
    }

    #[test]
    fn test_global_scope_replaces_other_controls() {
        let mut debounce = DebounceCoalescer::new(DEFAULT_QUIET_PERIOD, DebounceScope::Global);
        let t0 = Instant::now();

        debounce.schedule(hit(10, 5), t0);
        debounce.schedule(hit(11, 6), t0 + Duration::from_millis(100));

        assert_eq!(debounce.pending_len(), 1);
        assert_eq!(
            debounce.take_due(t0 + Duration::from_millis(600)),
            vec![hit(11, 6)]
        );
    }

    #[test]
    fn test_settle_isolated_signal() {
        let classifier = range_classifier("- type: range\n  midi: [176, 10]\n  keys: \"ctrl up\"");
        let mut history = HistoryTracker::default();
        history.record(RawSample::new(176, 10, 64), Instant::now());

        assert_eq!(
            settle(hit(10, 64), &history, &classifier),
            Settled::Isolated(hit(10, 64))
        );
    }

    #[test]
    fn test_settle_unknown_control_is_isolated() {
        let classifier = range_classifier("- type: range\n  midi: [176, 10]\n  keys: \"ctrl up\"");
        let history = HistoryTracker::default();

        assert!(matches!(
            settle(hit(10, 64), &history, &classifier),
            Settled::Isolated(_)
        ));
    }

    #[test]
    fn test_settle_emits_scaled_payload() {
        let classifier = range_classifier(
            "- type: range\n  midi: [176, 10]\n  mqtt: [\"t\", \"val={{payload}}\"]",
        );
        let mut history = HistoryTracker::default();
        let t0 = Instant::now();
        history.record(RawSample::new(176, 10, 64), t0);
        history.record(RawSample::new(176, 10, 100), t0 + Duration::from_millis(100));

        let Settled::Emit(action) = settle(hit(10, 100), &history, &classifier) else {
            panic!("expected emission");
        };
        assert_eq!(action.mqtt_topic.as_deref(), Some("t"));
        assert_eq!(action.mqtt_payload.as_deref(), Some("val=8"));
    }

    #[test]
    fn test_classified_hit_settles_through_its_entry() {
        let classifier = range_classifier(
            r#"
- midi: [176, 10, 127]
  keys: "ctrl up"
- type: range
  midi: [176, 10]
  mqtt: ["t", "{{payload}}"]
"#,
        );
        let t0 = Instant::now();
        let mut history = HistoryTracker::default();
        let mut last = None;
        for (i, value) in [20u8, 127].into_iter().enumerate() {
            let sample = RawSample::new(176, 10, value);
            history.record(sample, t0 + Duration::from_millis(50 * i as u64));
            last = classifier.classify(&sample).range;
        }

        let hit = last.unwrap();
        assert_eq!(hit.index, 1);
        let Settled::Emit(action) = settle(hit, &history, &classifier) else {
            panic!("expected emission");
        };
        assert_eq!(action.mqtt_payload.as_deref(), Some("10"));
    }

    #[test]
    fn test_settle_misconfigured_range() {
        let classifier = range_classifier(
            "- type: range\n  midi: [176, 10]\n  min: 3\n  max: 3\n  keys: \"ctrl up\"",
        );
        let mut history = HistoryTracker::default();
        let t0 = Instant::now();
        history.record(RawSample::new(176, 10, 1), t0);
        history.record(RawSample::new(176, 10, 2), t0);

        assert_eq!(
            settle(hit(10, 2), &history, &classifier),
            Settled::Misconfigured {
                hit: hit(10, 2),
                error: ScaleError::EmptyRange(3.0),
            }
        );
    }
}
