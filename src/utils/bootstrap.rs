//! Bootstrap utilities for the consumer binary.
//!
//! Shared initialization code: tracing setup, config path parsing, signal
//! handling, and the bounded startup retry used for the store connection.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the WEATHER_LOG environment variable.
///
/// Defaults to "info" level if WEATHER_LOG is not set. Set
/// WEATHER_LOG_FORMAT=json for one JSON object per line.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Config file path from `--config <path>` (or `-c <path>`), if given.
pub fn parse_config_path() -> Option<String> {
    config_path_from_args(std::env::args().skip(1))
}

fn config_path_from_args<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Resolve on SIGTERM or SIGINT (Ctrl-C).
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("SIGTERM received, initiating graceful shutdown");
                        return;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("SIGINT received, initiating graceful shutdown");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, initiating graceful shutdown"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

/// Connect to a service with a fixed retry budget.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "postgres")
/// * `address` - The address being connected to, for logging
/// * `attempts` - Total attempts before giving up (at least one is made)
/// * `delay` - Pause between attempts
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connected value on success, or the last error once the budget is spent.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    attempts: u32,
    delay: Duration,
    mut connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                tracing::info!("Connected to {} at {}", service_name, address);
                return Ok(client);
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "Failed to connect to {} (attempt {}/{}): {}. Retrying in {:?}...",
                    service_name, attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to {} after {} attempts: {}",
                    service_name,
                    attempts,
                    e
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(
            config_path_from_args(args(&["--config", "prod.yaml"])),
            Some("prod.yaml".to_string())
        );
        assert_eq!(
            config_path_from_args(args(&["-c", "dev.yaml"])),
            Some("dev.yaml".to_string())
        );
        assert_eq!(
            config_path_from_args(args(&["--config=other.yaml"])),
            Some("other.yaml".to_string())
        );
        assert_eq!(config_path_from_args(args(&[])), None);
        assert_eq!(config_path_from_args(args(&["--config"])), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_succeeds_after_failures() {
        let mut calls = 0;
        let result: Result<u32, String> =
            connect_with_retry("store", "localhost", 5, Duration::from_secs(2), || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(format!("refused #{}", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up_after_budget() {
        let mut calls = 0;
        let started = tokio::time::Instant::now();
        let result: Result<(), String> =
            connect_with_retry("store", "localhost", 4, Duration::from_secs(2), || {
                calls += 1;
                async { Err("refused".to_string()) }
            })
            .await;

        assert_eq!(result, Err("refused".to_string()));
        assert_eq!(calls, 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_connect_with_retry_makes_at_least_one_attempt() {
        let mut calls = 0;
        let result: Result<(), String> =
            connect_with_retry("store", "localhost", 0, Duration::from_secs(60), || {
                calls += 1;
                async { Ok(()) }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }
}
