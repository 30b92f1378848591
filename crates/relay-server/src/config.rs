//! Server configuration.
//!
//! Configuration is layered, lowest precedence first:
//! - Built-in defaults
//! - TOML configuration file (first of `relay.toml`, `/etc/relay/relay.toml`,
//!   `~/.config/relay/relay.toml`)
//! - Environment variables (`RELAY__PORT`, `RELAY__ENGINE__PING_INTERVAL_MS`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenvis_relay_core::{CleanupConfig, QueueConfig};
use tenvis_relay_transport::PollingConfig;

/// Default config file locations, in search order.
const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Engine.IO endpoint configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Delivery queue configuration.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Heartbeat sweep configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Cleanup sweep configuration.
    #[serde(default)]
    pub cleanup: CleanupSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Engine.IO endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path the endpoint is mounted on.
    #[serde(default = "default_engine_path")]
    pub path: String,

    /// Ping interval advertised to clients, and the longest a poll waits.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Liveness timeout.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Largest outbound payload in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    /// Largest accepted POST body in bytes.
    #[serde(default = "default_max_http_buffer_size")]
    pub max_http_buffer_size: usize,

    /// Expiry of a connection's transport binding, if any.
    #[serde(default)]
    pub session_ttl_ms: Option<u64>,

    /// Sleep between checks for new deliveries during a poll.
    #[serde(default = "default_poll_tick")]
    pub poll_tick_ms: u64,
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// In-memory entries kept per room.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Age in seconds after which in-memory entries are evicted.
    #[serde(default = "default_queue_max_age")]
    pub max_age_secs: u64,

    /// Failed attempts allowed per delivery.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Days durable messages and deliveries are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Run the heartbeat daemon.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    /// Run the cleanup daemon.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cleanup interval in milliseconds.
    #[serde(default = "default_cleanup_interval")]
    pub interval_ms: u64,

    /// Days delivery records are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds a disconnected record may stay idle before deletion.
    #[serde(default = "default_inactive_connection")]
    pub inactive_connection_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_engine_path() -> String {
    "/socket.io/".to_string()
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    30_000
}

fn default_max_payload_size() -> usize {
    100_000
}

fn default_max_http_buffer_size() -> usize {
    1_000_000
}

fn default_poll_tick() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_queue_max_age() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention_days() -> u32 {
    7
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_cleanup_interval() -> u64 {
    3_600_000 // 1 hour
}

fn default_inactive_connection() -> u64 {
    3600
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            engine: EngineConfig::default(),
            queue: QueueSettings::default(),
            heartbeat: HeartbeatConfig::default(),
            cleanup: CleanupSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            ping_interval_ms: default_ping_interval(),
            ping_timeout_ms: default_ping_timeout(),
            max_payload_size: default_max_payload_size(),
            max_http_buffer_size: default_max_http_buffer_size(),
            session_ttl_ms: None,
            poll_tick_ms: default_poll_tick(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            max_age_secs: default_queue_max_age(),
            max_retries: default_max_retries(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_cleanup_interval(),
            retention_days: default_retention_days(),
            inactive_connection_secs: default_inactive_connection(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let base = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        base.with_overrides(config::Environment::with_prefix("RELAY").separator("__"))
    }

    /// Layer environment overrides on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has the wrong type.
    pub fn with_overrides(&self, env: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(config::Config::try_from(self).context("Failed to layer configuration")?)
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

impl EngineConfig {
    /// Long-polling settings.
    #[must_use]
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            max_payload_size: self.max_payload_size,
            max_http_buffer_size: self.max_http_buffer_size,
            poll_tick: Duration::from_millis(self.poll_tick_ms),
        }
    }

    /// Liveness timeout.
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Transport binding lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_ms.map(Duration::from_millis)
    }
}

impl QueueSettings {
    /// Delivery queue settings.
    #[must_use]
    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.capacity,
            max_age: Duration::from_secs(self.max_age_secs),
            max_retries: self.max_retries,
            retention_days: self.retention_days,
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat controller settings.
    #[must_use]
    pub fn controller(&self, ping_timeout: Duration) -> tenvis_relay_core::HeartbeatConfig {
        tenvis_relay_core::HeartbeatConfig {
            interval: Duration::from_millis(self.interval_ms),
            ping_timeout,
        }
    }
}

impl CleanupSettings {
    /// Cleanup controller settings.
    #[must_use]
    pub fn controller(&self) -> CleanupConfig {
        CleanupConfig {
            interval: Duration::from_millis(self.interval_ms),
            retention_days: self.retention_days,
            inactive_connection: Duration::from_secs(self.inactive_connection_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine.path, "/socket.io/");
        assert_eq!(config.engine.ping_interval_ms, 25_000);
        assert_eq!(config.queue.capacity, 1000);
        assert!(config.heartbeat.enabled);
        assert!(config.engine.session_ttl().is_none());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [engine]
            ping_interval_ms = 10000
            session_ttl_ms = 60000

            [cleanup]
            retention_days = 3
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.polling().ping_interval, Duration::from_secs(10));
        assert_eq!(config.engine.max_payload_size, 100_000);
        assert_eq!(config.engine.session_ttl(), Some(Duration::from_secs(60)));
        assert_eq!(config.cleanup.controller().retention_days, 3);
        assert_eq!(config.queue.queue().max_age, Duration::from_secs(300));
    }

    #[test]
    fn test_config_layers() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "port = 9100\n[queue]\ncapacity = 10\n",
                config::FileFormat::Toml,
            ))
            .set_override("heartbeat.enabled", false)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.queue.capacity, 10);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_config_file_with_env_overrides() {
        let path = std::env::temp_dir().join(format!("relay-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9200\n[engine]\nping_interval_ms = 5000\n").unwrap();
        let base = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let env = config::Environment::with_prefix("RELAY")
            .separator("__")
            .source(Some(
                [("RELAY__ENGINE__PING_TIMEOUT_MS".to_string(), "45000".to_string())]
                    .into_iter()
                    .collect(),
            ));
        let config = base.with_overrides(env).unwrap();

        assert_eq!(config.port, 9200);
        assert_eq!(config.engine.ping_interval_ms, 5000);
        assert_eq!(config.engine.ping_timeout(), Duration::from_secs(45));
        assert!(config.engine.session_ttl().is_none());
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_config_file_missing() {
        let path = std::env::temp_dir().join("relay-missing-config.toml");
        assert!(Config::from_file(path).is_err());
    }
}
