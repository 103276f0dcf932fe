//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables. Every
//! option has a default suitable for local use.

mod broker;
mod reconnect;
mod storage;

pub use broker::BrokerConfig;
pub use reconnect::ReconnectConfig;
pub use storage::StoreConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "WEATHER_CONFIG";
/// Prefix for configuration environment variables (`WEATHER__BROKER__HOST`).
pub const CONFIG_ENV_PREFIX: &str = "WEATHER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "WEATHER_LOG";
/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_ENV_VAR: &str = "WEATHER_LOG_FORMAT";

/// Flat variables of the compose deployment, applied last.
pub mod legacy_env {
    pub const RABBITMQ_HOST: &str = "RABBITMQ_HOST";
    pub const RABBITMQ_PORT: &str = "RABBITMQ_PORT";
    pub const RABBITMQ_USER: &str = "RABBITMQ_USER";
    pub const RABBITMQ_PASS: &str = "RABBITMQ_PASS";
    pub const RABBITMQ_VHOST: &str = "RABBITMQ_VHOST";
    pub const EXCHANGE: &str = "EXCHANGE";
    pub const QUEUE: &str = "QUEUE";
    pub const PGHOST: &str = "PGHOST";
    pub const PGPORT: &str = "PGPORT";
    pub const PGUSER: &str = "PGUSER";
    pub const PGPASSWORD: &str = "PGPASSWORD";
    pub const PGDATABASE: &str = "PGDATABASE";
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and topology.
    pub broker: BrokerConfig,
    /// Relational store connection.
    pub store: StoreConfig,
    /// Session reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Legacy variables (`RABBITMQ_HOST`, `PGHOST`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let raw = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = raw.try_deserialize()?;
        config.apply_legacy_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply the legacy flat environment variables.
    ///
    /// `lookup` abstracts the environment so overrides can be tested without
    /// touching process state.
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        use legacy_env::*;

        if let Some(v) = lookup(RABBITMQ_HOST) {
            self.broker.host = v;
        }
        if let Some(v) = lookup(RABBITMQ_PORT) {
            self.broker.port = parse_port(RABBITMQ_PORT, &v)?;
        }
        if let Some(v) = lookup(RABBITMQ_USER) {
            self.broker.user = v;
        }
        if let Some(v) = lookup(RABBITMQ_PASS) {
            self.broker.password = v;
        }
        if let Some(v) = lookup(RABBITMQ_VHOST) {
            self.broker.vhost = v;
        }
        if let Some(v) = lookup(EXCHANGE) {
            self.broker.exchange = v;
        }
        if let Some(v) = lookup(QUEUE) {
            self.broker.queue = v;
        }
        if let Some(v) = lookup(PGHOST) {
            self.store.host = v;
        }
        if let Some(v) = lookup(PGPORT) {
            self.store.port = parse_port(PGPORT, &v)?;
        }
        if let Some(v) = lookup(PGUSER) {
            self.store.user = v;
        }
        if let Some(v) = lookup(PGPASSWORD) {
            self.store.password = v;
        }
        if let Some(v) = lookup(PGDATABASE) {
            self.store.database = v;
        }

        Ok(())
    }
}

fn parse_port(var: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
}
