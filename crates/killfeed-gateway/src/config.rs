//! Configuration loading for the gateway.
//!
//! The canonical configuration lives in `killfeed-config.yaml` at the
//! project root. Every field has a default, so a missing file or an empty
//! section yields a working configuration for local development.
//!
//! Environment variables override the file:
//! - `KILLFEED_CONFIG` selects an alternate file path
//! - `KILLFEED_PORT` overrides `server.port`
//! - `NATS_URL` overrides `bus.nats_url`
//! - `DRAGONFLY_URL` overrides `stats.dragonfly_url`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::liveness::LivenessSettings;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "killfeed-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {value}")]
    Env {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level gateway configuration.
///
/// Mirrors the structure of `killfeed-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// NATS connection and subjects.
    #[serde(default)]
    pub bus: BusConfig,

    /// Keep-alive timers.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Connection stats publishing.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, and
    /// [`ConfigError::Env`] for an unparseable override.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Env`] for an unparseable override.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Load from `KILLFEED_CONFIG`, or [`DEFAULT_CONFIG_PATH`] when unset.
    ///
    /// A missing default file yields the defaults; a missing file named by
    /// `KILLFEED_CONFIG` is an error.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_file`] and [`GatewayConfig::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("KILLFEED_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::parse("")?
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if `KILLFEED_PORT` is not a port number.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("KILLFEED_PORT") {
            self.server.port = val.parse().map_err(|_| ConfigError::Env {
                var: "KILLFEED_PORT",
                value: val.clone(),
            })?;
        }
        if let Some(val) = lookup("NATS_URL") {
            self.bus.nats_url = val;
        }
        if let Some(val) = lookup("DRAGONFLY_URL") {
            self.stats.dragonfly_url = val;
        }
        Ok(())
    }

    /// Reject values the gateway cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str| Err(ConfigError::Invalid(format!("{field} must be non-zero")));
        if self.server.outbound_queue_capacity == 0 {
            return invalid("server.outbound_queue_capacity");
        }
        if self.liveness.ping_interval_ms == 0 {
            return invalid("liveness.ping_interval_ms");
        }
        if self.liveness.sweep_interval_ms == 0 {
            return invalid("liveness.sweep_interval_ms");
        }
        if self.liveness.pong_timeout_ms == 0 {
            return invalid("liveness.pong_timeout_ms");
        }
        if self.stats.enabled && self.stats.interval_ms == 0 {
            return invalid("stats.interval_ms");
        }
        if self.stats.enabled && self.stats.ttl_secs == 0 {
            return invalid("stats.ttl_secs");
        }
        if self.stats.enabled && self.stats.ttl_secs.saturating_mul(1000) <= self.stats.interval_ms {
            return Err(ConfigError::Invalid(String::from(
                "stats.ttl_secs must outlast stats.interval_ms",
            )));
        }
        for (field, value) in [
            ("bus.nats_url", &self.bus.nats_url),
            ("bus.event_subject", &self.bus.event_subject),
            ("bus.direct_subject", &self.bus.direct_subject),
            ("stats.key", &self.stats.key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames buffered per connection before sends start failing.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

/// NATS configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject carrying killmail events.
    #[serde(default = "default_event_subject")]
    pub event_subject: String,

    /// Subject carrying direct messages.
    #[serde(default = "default_direct_subject")]
    pub direct_subject: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            event_subject: default_event_subject(),
            direct_subject: default_direct_subject(),
        }
    }
}

/// Keep-alive timer configuration, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LivenessConfig {
    /// Interval between ping rounds.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Interval between stale-connection sweeps.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// How long a ping may stay unanswered.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
}

impl LivenessConfig {
    /// Convert to monitor settings.
    pub const fn settings(&self) -> LivenessSettings {
        LivenessSettings {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
        }
    }
}

/// Connection stats publishing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsConfig {
    /// Whether to publish stats at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `Dragonfly` URL.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,

    /// Key holding the stats blob.
    #[serde(default = "default_stats_key")]
    pub key: String,

    /// Publish interval in milliseconds.
    #[serde(default = "default_stats_interval_ms")]
    pub interval_ms: u64,

    /// Key expiry in seconds.
    #[serde(default = "default_stats_ttl_secs")]
    pub ttl_secs: u64,
}

impl StatsConfig {
    /// Publish interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dragonfly_url: default_dragonfly_url(),
            key: default_stats_key(),
            interval_ms: default_stats_interval_ms(),
            ttl_secs: default_stats_ttl_secs(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    3002
}

const fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_nats_url() -> String {
    String::from("nats://localhost:4222")
}

fn default_event_subject() -> String {
    String::from("killfeed.killmails")
}

fn default_direct_subject() -> String {
    String::from("killfeed.direct")
}

const fn default_ping_interval_ms() -> u64 {
    30_000
}

const fn default_sweep_interval_ms() -> u64 {
    5_000
}

const fn default_pong_timeout_ms() -> u64 {
    10_000
}

const fn default_true() -> bool {
    true
}

fn default_dragonfly_url() -> String {
    String::from("redis://localhost:6379")
}

fn default_stats_key() -> String {
    String::from(killfeed_store::DEFAULT_STATS_KEY)
}

const fn default_stats_interval_ms() -> u64 {
    5_000
}

const fn default_stats_ttl_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    String::from("info")
}
