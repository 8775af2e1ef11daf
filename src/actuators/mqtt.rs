//! MQTT publish actuator
//!
//! Publishing never waits on the broker: messages are queued with
//! `try_publish` and the rumqttc event loop runs in its own task. The same
//! task reopens the MIDI input whenever the broker (re)connects and turns
//! messages on the control topic into pause/resume commands.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Actuator;
use crate::config::MqttConfig;
use crate::engine::EngineHandle;
use crate::mapping::ResolvedAction;

/// Outstanding requests buffered between the client and the event loop
const REQUEST_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Payload accepted on the control topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
}

impl ControlCommand {
    /// Case-insensitive `pause`/`stop` or `resume`/`start`
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "pause" | "stop" => Some(ControlCommand::Pause),
            "resume" | "start" => Some(ControlCommand::Resume),
            _ => None,
        }
    }
}

pub struct MqttActuator {
    client: AsyncClient,
}

impl MqttActuator {
    /// Actuator publishing through an already connected client
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    /// Create the client and spawn its event loop
    pub fn connect(config: &MqttConfig, engine: EngineHandle) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        info!("📡 Connecting to MQTT broker {}:{}", config.host, config.port);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            config.control_topic.clone(),
            engine,
        ));

        (Self::new(client), task)
    }
}

impl Actuator for MqttActuator {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn perform(&self, action: &ResolvedAction) -> Result<()> {
        let Some(topic) = action.mqtt_topic.as_deref() else {
            return Ok(());
        };
        let payload = action.mqtt_payload.clone().unwrap_or_default();

        info!("Send mqtt: {} {}", topic, payload);
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("Failed to queue publish to '{}'", topic))
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    control_topic: Option<String>,
    engine: EngineHandle,
) {
    while !engine.is_closed() {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("✅ MQTT connected");
                engine.reopen();
                if let Some(topic) = &control_topic {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        warn!("Failed to subscribe to '{}': {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if control_topic.as_deref() != Some(publish.topic.as_str()) {
                    continue;
                }
                let payload = String::from_utf8_lossy(&publish.payload);
                match ControlCommand::parse(&payload) {
                    Some(ControlCommand::Pause) => engine.pause(),
                    Some(ControlCommand::Resume) => engine.resume(),
                    None => debug!("Unknown control payload '{}'", payload),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    debug!("MQTT event loop stopped");
}
