mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings, StoreSettings};

/// Upper bound accepted for `server.keepalive_secs`.
pub const MAX_KEEPALIVE_SECS: u64 = 600;

/// Loads `config/default.*` (optional) and `ROUTEMQ__*` environment
/// variables, merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit config file stem.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix("ROUTEMQ").separator("__"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let server = partial.server;
    let broker = partial.broker;
    let store = partial.store;
    let log = partial.log;

    let settings = Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            password: server
                .as_ref()
                .and_then(|s| s.password.clone())
                .filter(|p| !p.is_empty())
                .or(default.server.password),
            keepalive_secs: server
                .as_ref()
                .and_then(|s| s.keepalive_secs)
                .unwrap_or(default.server.keepalive_secs),
        },
        broker: BrokerSettings {
            max_queue_size: broker
                .as_ref()
                .and_then(|b| b.max_queue_size)
                .unwrap_or(default.broker.max_queue_size),
            message_timeout_secs: broker
                .as_ref()
                .and_then(|b| b.message_timeout_secs)
                .unwrap_or(default.broker.message_timeout_secs),
            route_idle_secs: broker
                .as_ref()
                .and_then(|b| b.route_idle_secs)
                .unwrap_or(default.broker.route_idle_secs),
            ack_timeout_secs: broker
                .as_ref()
                .and_then(|b| b.ack_timeout_secs)
                .unwrap_or(default.broker.ack_timeout_secs),
            mailbox_capacity: broker
                .as_ref()
                .and_then(|b| b.mailbox_capacity)
                .unwrap_or(default.broker.mailbox_capacity),
        },
        store: StoreSettings {
            driver: store
                .as_ref()
                .and_then(|s| s.driver.clone())
                .unwrap_or(default.store.driver),
            path: store
                .as_ref()
                .and_then(|s| s.path.clone())
                .unwrap_or(default.store.path),
        },
        log: LogSettings {
            level: log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    };

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.server.keepalive_secs > MAX_KEEPALIVE_SECS {
        return Err(ConfigError::Message(format!(
            "keepalive must be at most {MAX_KEEPALIVE_SECS}s, not {}",
            settings.server.keepalive_secs
        )));
    }
    if settings.broker.max_queue_size == 0 {
        return Err(ConfigError::Message(
            "broker.max_queue_size must be positive".to_string(),
        ));
    }
    if settings.broker.ack_timeout_secs == 0 {
        return Err(ConfigError::Message(
            "broker.ack_timeout_secs must be positive".to_string(),
        ));
    }
    if settings.broker.route_idle_secs == 0 {
        return Err(ConfigError::Message(
            "broker.route_idle_secs must be positive".to_string(),
        ));
    }
    if settings.broker.mailbox_capacity == 0 {
        return Err(ConfigError::Message(
            "broker.mailbox_capacity must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
