//! Relational store configuration.

use std::time::Duration;

use serde::Deserialize;

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database host name.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Create the `weather_logs` table at startup if it is missing.
    pub ensure_schema: bool,
    /// Connection attempts at startup before giving up.
    pub connect_attempts: u32,
    /// Delay between startup connection attempts, in milliseconds.
    pub connect_delay_ms: u64,
    /// Upper bound on one persist attempt (reconnect + insert), in milliseconds.
    pub write_timeout_ms: u64,
    /// Pause before a reading whose write failed goes back to the queue,
    /// in milliseconds.
    pub requeue_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "weather".to_string(),
            password: "weatherpass".to_string(),
            database: "weatherdb".to_string(),
            ensure_schema: true,
            connect_attempts: 10,
            connect_delay_ms: 2_000,
            write_timeout_ms: 10_000,
            requeue_delay_ms: 1_000,
        }
    }
}

impl StoreConfig {
    /// `host:port/database`, for logs.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let store = StoreConfig::default();
        assert_eq!(store.host, "localhost");
        assert_eq!(store.user, "weather");
        assert_eq!(store.connect_attempts, 10);
        assert_eq!(store.connect_delay(), Duration::from_secs(2));
        assert_eq!(store.write_timeout(), Duration::from_secs(10));
        assert_eq!(store.requeue_delay(), Duration::from_secs(1));
        assert_eq!(store.address(), "localhost:5432/weatherdb");
    }
}
