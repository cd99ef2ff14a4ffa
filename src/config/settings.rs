use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

/// Where the WebSocket server listens and how it treats connections.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// When set, connections must `auth` with this password first.
    pub password: Option<String>,
    /// Heartbeat interval expected from peers; 0 disables the check.
    pub keepalive_secs: u64,
}

/// Route queue behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Backlog cap per route; the oldest message is dropped beyond it.
    pub max_queue_size: usize,
    /// Backlog messages older than this are discarded undelivered.
    pub message_timeout_secs: u64,
    /// A route with no subscribers and no backlog is reclaimed after this.
    pub route_idle_secs: u64,
    /// An unanswered delivery is released for redelivery after this.
    pub ack_timeout_secs: u64,
    pub mailbox_capacity: usize,
}

/// Which store backend to open.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub driver: String,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub store: Option<PartialStoreSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub keepalive_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_queue_size: Option<usize>,
    pub message_timeout_secs: Option<u64>,
    pub route_idle_secs: Option<u64>,
    pub ack_timeout_secs: Option<u64>,
    pub mailbox_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub driver: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                password: None,
                keepalive_secs: 60,
            },
            broker: BrokerSettings::default(),
            store: StoreSettings {
                driver: "memory".to_string(),
                path: "routemq_db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1024,
            message_timeout_secs: 3600,
            route_idle_secs: 300,
            ack_timeout_secs: 60,
            mailbox_capacity: 32,
        }
    }
}
