//! Runtime configuration
//!
//! Loaded from `FORUM_*` environment variables (and a `.env` file when
//! present) through the `config` and `dotenvy` crates, with defaults for
//! every field. A value that is present but unparseable is an error.
//!
//! - `FORUM_ADDR=0.0.0.0:9000` -> `addr`
//! - `FORUM_PONG_WAIT_SECS=30` -> `connection.pong_wait`

use std::path::PathBuf;
use std::time::Duration;

use ::config::Environment;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default upgrade path
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Pending envelopes per connection before it is evicted
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Read deadline, refreshed by any inbound frame
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Bound on a single transport write
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Largest inbound message accepted
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Per-connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub queue_capacity: usize,
    pub pong_wait: Duration,
    /// Heartbeat interval, always shorter than `pong_wait`
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
}

impl ConnectionConfig {
    pub fn new(pong_wait: Duration) -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: DEFAULT_WRITE_WAIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Transport limits for the handshake
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PONG_WAIT)
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub ws_path: String,
    pub connection: ConnectionConfig,
    /// JSON file with users and sessions for the in-memory store
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        EnvSettings::default().into()
    }
}

impl Config {
    /// Load from the process environment
    ///
    /// # Errors
    ///
    /// - `Load` if a variable cannot be parsed into its field type
    /// - `InvalidValue` if a parsed value is out of range
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        Self::from_environment(Environment::with_prefix("FORUM").try_parsing(true))
    }

    /// Load from a prepared environment source
    pub fn from_environment(source: Environment) -> Result<Self, ConfigError> {
        let settings: EnvSettings = ::config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings.into())
    }
}

/// One field per `FORUM_*` variable, before conversion
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct EnvSettings {
    addr: String,
    ws_path: String,
    queue_capacity: usize,
    pong_wait_secs: u64,
    write_wait_secs: u64,
    max_message_size: usize,
    seed_file: Option<PathBuf>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pong_wait_secs: DEFAULT_PONG_WAIT.as_secs(),
            write_wait_secs: DEFAULT_WRITE_WAIT.as_secs(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            seed_file: None,
        }
    }
}

impl EnvSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "FORUM_WS_PATH",
                value: self.ws_path.clone(),
            });
        }
        if self.pong_wait_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FORUM_PONG_WAIT_SECS",
                value: self.pong_wait_secs.to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FORUM_QUEUE_CAPACITY",
                value: self.queue_capacity.to_string(),
            });
        }
        Ok(())
    }
}

impl From<EnvSettings> for Config {
    fn from(settings: EnvSettings) -> Self {
        let mut connection = ConnectionConfig::new(Duration::from_secs(settings.pong_wait_secs));
        connection.queue_capacity = settings.queue_capacity;
        connection.write_wait = Duration::from_secs(settings.write_wait_secs);
        connection.max_message_size = settings.max_message_size;

        Self {
            addr: settings.addr,
            ws_path: settings.ws_path,
            connection,
            seed_file: settings.seed_file,
        }
    }
}
