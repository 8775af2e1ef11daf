//! Action boundary
//!
//! Resolved actions leave the engine over a channel and are handed to every
//! registered actuator. Actuators pick the part of the action they handle
//! (keys or MQTT) and must not block.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::mapping::ResolvedAction;

pub mod console;
pub mod keys;
pub mod mqtt;

pub use console::ConsoleActuator;
pub use keys::{CommandInjector, KeyChord, KeyChordError, KeyInjector, KeystrokeActuator, NativeInjector};
pub use mqtt::{ControlCommand, MqttActuator};

/// Side-effect sink for resolved actions
pub trait Actuator: Send + Sync {
    /// Short name used in logs (e.g. "keys", "mqtt")
    fn name(&self) -> &str;

    /// Perform the relevant part of `action`; actions without such a part are
    /// a successful no-op
    fn perform(&self, action: &ResolvedAction) -> Result<()>;
}

/// Fans every action out to the registered actuators
#[derive(Default)]
pub struct ActionDispatcher {
    actuators: Vec<Box<dyn Actuator>>,
}

impl ActionDispatcher {
    /// Dispatcher without actuators; every action is dropped
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `actuator` after the ones already added
    pub fn with(mut self, actuator: impl Actuator + 'static) -> Self {
        self.actuators.push(Box::new(actuator));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.actuators.iter().map(|a| a.name()).collect()
    }

    /// Failures are logged; one failing actuator does not stop the others
    pub fn dispatch(&self, action: &ResolvedAction) {
        for actuator in &self.actuators {
            if let Err(e) = actuator.perform(action) {
                warn!("{} failed for {}: {:#}", actuator.name(), action.source, e);
            }
        }
    }

    /// Consume actions until the engine drops its sender
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<ResolvedAction>) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Action dispatcher started ({})", self.names().join(", "));
            while let Some(action) = rx.recv().await {
                self.dispatch(&action);
            }
            debug!("Action dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::ControlKey;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Actuator for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn perform(&self, action: &ResolvedAction) -> Result<()> {
            self.seen.lock().push(action.to_string());
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn action() -> ResolvedAction {
        ResolvedAction {
            source: ControlKey::new(176, 7),
            keys: Some("ctrl a".into()),
            mqtt_topic: None,
            mqtt_payload: None,
        }
    }

    #[test]
    fn test_failure_does_not_stop_others() {
        let failing = Recorder {
            fail: true,
            ..Default::default()
        };
        let healthy = Recorder::default();
        let dispatcher = ActionDispatcher::new()
            .with(failing.clone())
            .with(healthy.clone());

        dispatcher.dispatch(&action());

        assert_eq!(failing.seen.lock().len(), 1);
        assert_eq!(*healthy.seen.lock(), vec!["176-7: keys='ctrl a'".to_string()]);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_drains_channel() {
        let recorder = Recorder::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = ActionDispatcher::new().with(recorder.clone()).spawn(rx);

        tx.send(action()).unwrap();
        tx.send(action()).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(recorder.seen.lock().len(), 2);
    }
}
