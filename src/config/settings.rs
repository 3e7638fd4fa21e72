use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub relay: RelaySettings,
    pub mqtt: MqttSettings,
    pub broker: BrokerSettings,
    pub push: PushSettings,
    pub log: LogSettings,
}

/// Address the REST gateway binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Location of the match store: a `postgres://` connection string, a
/// `sled://` URL or a plain directory.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub url: String,
}

/// Which publisher the event relay writes to.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    Mqtt,
    Embedded,
    Disabled,
}

impl RelayBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayBackend::Mqtt => "mqtt",
            RelayBackend::Embedded => "embedded",
            RelayBackend::Disabled => "disabled",
        }
    }
}

impl fmt::Display for RelayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mqtt" => Ok(RelayBackend::Mqtt),
            "embedded" => Ok(RelayBackend::Embedded),
            "disabled" | "none" | "off" => Ok(RelayBackend::Disabled),
            other => Err(format!("unknown relay backend '{other}'")),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub backend: RelayBackend,
}

/// Connection parameters for an external MQTT broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive_secs: u64,
}

/// Configuration of the embedded WebSocket broker.
///
/// Controls the listener address, connection cap and how much history each
/// topic keeps for replay to late subscribers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub message_ttl_secs: u64,
    pub max_messages_per_topic: usize,
    /// sled directory for replay history when the store is PostgreSQL.
    pub history_path: String,
}

impl BrokerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PushSettings {
    pub enabled: bool,
    pub credentials_path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub database: Option<PartialDatabaseSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub mqtt: Option<PartialMqttSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub push: Option<PartialPushSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDatabaseSettings {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialMqttSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id_prefix: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
    pub message_ttl_secs: Option<u64>,
    pub max_messages_per_topic: Option<usize>,
    pub history_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPushSettings {
    pub enabled: Option<bool>,
    pub credentials_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseSettings {
                url: "futside_db".to_string(),
            },
            relay: RelaySettings {
                backend: RelayBackend::Embedded,
            },
            mqtt: MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                client_id_prefix: "futside_publisher".to_string(),
                username: None,
                password: None,
                tls: false,
                keep_alive_secs: 60,
            },
            broker: BrokerSettings {
                host: "0.0.0.0".to_string(),
                port: 8884,
                max_connections: 1000,
                message_ttl_secs: 3600,
                max_messages_per_topic: 100,
                history_path: "futside_history".to_string(),
            },
            push: PushSettings {
                enabled: true,
                credentials_path: "firebase-adminsdk.json".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
