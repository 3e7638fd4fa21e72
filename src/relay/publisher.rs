//! Publisher backends the relay writes through.
//!
//! - [`MqttPublisher`]: an external MQTT broker, via `rumqttc`
//! - [`BrokerPublisher`]: the in-process [`Broker`](crate::broker::Broker)
//! - [`DisabledPublisher`]: logs and drops
//! - [`MemoryPublisher`]: records publications, for tests and dry runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Transport};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::Qos;
use crate::broker::message::Message;
use crate::broker::{self, SharedBroker};
use crate::config::MqttSettings;

/// Requests the MQTT client may queue before `try_publish` reports it full.
const MQTT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn backend(&self) -> &'static str;

    /// Hand `payload` to the backend for delivery on `topic`.
    async fn publish(&self, topic: &str, payload: String, qos: Qos) -> Result<(), PublishError>;

    /// Flush and close connections. Publishing afterwards is an error or a
    /// no-op, depending on the backend.
    async fn shutdown(&self) {}
}

pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop. The connection is made
    /// lazily by the event loop and re-established after failures, so this
    /// never blocks on the network. Must be called inside a Tokio runtime.
    pub fn connect(settings: &MqttSettings) -> Self {
        let client_id = format!(
            "{}_{}",
            settings.client_id_prefix,
            chrono::Utc::now().timestamp()
        );
        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        if settings.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(options, MQTT_QUEUE_CAPACITY);
        let host = format!("{}:{}", settings.host, settings.port);

        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker at {host}");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection to {host} failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, event_loop }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn backend(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, topic: &str, payload: String, qos: Qos) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, qos.into(), false, payload.into_bytes())?;
        Ok(())
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {e}");
        }
        // give the event loop a moment to send DISCONNECT
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.event_loop.abort();
        info!("MQTT client disconnected");
    }
}

/// Publishes into the embedded broker.
pub struct BrokerPublisher {
    broker: SharedBroker,
}

impl BrokerPublisher {
    pub fn new(broker: SharedBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    fn backend(&self) -> &'static str {
        "embedded"
    }

    async fn publish(&self, topic: &str, payload: String, qos: Qos) -> Result<(), PublishError> {
        let delivered = broker::lock(&self.broker).publish(Message {
            topic: topic.to_string(),
            payload,
            timestamp: 0,
            message_id: String::new(),
            qos: qos.level(),
        });
        debug!("'{topic}' delivered to {delivered} subscriber(s)");
        Ok(())
    }
}

pub struct DisabledPublisher;

#[async_trait]
impl Publisher for DisabledPublisher {
    fn backend(&self) -> &'static str {
        "disabled"
    }

    async fn publish(&self, topic: &str, payload: String, _qos: Qos) -> Result<(), PublishError> {
        debug!("Relay disabled, dropping publication on '{topic}': {payload}");
        Ok(())
    }
}

/// One publication captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: String, qos: Qos) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("memory publisher set to fail".into()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_string(),
                payload,
                qos,
            });
        Ok(())
    }
}
