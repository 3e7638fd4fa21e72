//! Configuration loading.
//!
//! Sources, later ones winning: `config/default.{toml,yaml,json}` (optional),
//! `FUTSIDE__SECTION__KEY` environment variables, then the legacy variables
//! `DATABASE_URL`, `MQTT_BROKER_HOST` and `MQTT_BROKER_PORT`.

mod settings;

use std::env;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, DatabaseSettings, LogSettings, MqttSettings, PushSettings, RelayBackend,
    RelaySettings, ServerSettings, Settings,
};

/// Loads the configuration from `config/default` and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the file source from `path`
/// (extension optional, the file may be missing).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("FUTSIDE")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("database.url", env::var("DATABASE_URL").ok())?
        .set_override_option("mqtt.host", env::var("MQTT_BROKER_HOST").ok())?
        .set_override_option("mqtt.port", env::var("MQTT_BROKER_PORT").ok())?;

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    merge(partial)
}

fn merge(partial: PartialSettings) -> Result<Settings, ConfigError> {
    let default = Settings::default();

    let backend = match partial.relay.and_then(|r| r.backend) {
        Some(raw) => raw.parse().map_err(ConfigError::Message)?,
        None => default.relay.backend,
    };

    let server = partial.server;
    let database = partial.database;
    let mqtt = partial.mqtt;
    let broker = partial.broker;
    let push = partial.push;
    let log = partial.log;

    Ok(Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        database: DatabaseSettings {
            url: database
                .and_then(|d| d.url)
                .unwrap_or(default.database.url),
        },
        relay: RelaySettings { backend },
        mqtt: MqttSettings {
            host: mqtt
                .as_ref()
                .and_then(|m| m.host.clone())
                .unwrap_or(default.mqtt.host),
            port: mqtt
                .as_ref()
                .and_then(|m| m.port)
                .unwrap_or(default.mqtt.port),
            client_id_prefix: mqtt
                .as_ref()
                .and_then(|m| m.client_id_prefix.clone())
                .unwrap_or(default.mqtt.client_id_prefix),
            username: mqtt.as_ref().and_then(|m| m.username.clone()),
            password: mqtt.as_ref().and_then(|m| m.password.clone()),
            tls: mqtt
                .as_ref()
                .and_then(|m| m.tls)
                .unwrap_or(default.mqtt.tls),
            keep_alive_secs: mqtt
                .as_ref()
                .and_then(|m| m.keep_alive_secs)
                .unwrap_or(default.mqtt.keep_alive_secs),
        },
        broker: BrokerSettings {
            host: broker
                .as_ref()
                .and_then(|b| b.host.clone())
                .unwrap_or(default.broker.host),
            port: broker
                .as_ref()
                .and_then(|b| b.port)
                .unwrap_or(default.broker.port),
            max_connections: broker
                .as_ref()
                .and_then(|b| b.max_connections)
                .unwrap_or(default.broker.max_connections),
            message_ttl_secs: broker
                .as_ref()
                .and_then(|b| b.message_ttl_secs)
                .unwrap_or(default.broker.message_ttl_secs),
            max_messages_per_topic: broker
                .as_ref()
                .and_then(|b| b.max_messages_per_topic)
                .unwrap_or(default.broker.max_messages_per_topic),
            history_path: broker
                .as_ref()
                .and_then(|b| b.history_path.clone())
                .unwrap_or(default.broker.history_path),
        },
        push: PushSettings {
            enabled: push
                .as_ref()
                .and_then(|p| p.enabled)
                .unwrap_or(default.push.enabled),
            credentials_path: push
                .as_ref()
                .and_then(|p| p.credentials_path.clone())
                .unwrap_or(default.push.credentials_path),
        },
        log: LogSettings {
            level: log.and_then(|l| l.level).unwrap_or(default.log.level),
        },
    })
}
