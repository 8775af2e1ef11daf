//! Console actuator - logs every action, used for dry runs and debugging

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::Actuator;
use crate::mapping::ResolvedAction;

pub struct ConsoleActuator {
    name: String,
    execution_count: AtomicU64,
}

impl ConsoleActuator {
    /// Console actuator reported as `name` in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_count: AtomicU64::new(0),
        }
    }

    /// Actions logged so far
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }
}

impl Actuator for ConsoleActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn perform(&self, action: &ResolvedAction) -> Result<()> {
        let exec_num = self.execution_count.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "🎹 [{}] {} [exec #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            action,
            exec_num
        );
        debug!(
            actuator = %self.name,
            source = %action.source,
            keys = ?action.keys,
            topic = ?action.mqtt_topic,
            payload = ?action.mqtt_payload,
            "ConsoleActuator execution"
        );

        Ok(())
    }
}
