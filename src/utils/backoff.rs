//! Reconnect backoff and an injectable clock.
//!
//! Uses `backon` for the exponential schedule. The schedule has no attempt
//! limit: the consumer retries forever, and the delay stays at the cap once
//! it gets there.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::sync::Mutex;

use crate::config::ReconnectConfig;
use crate::shutdown::ShutdownTrigger;

/// Exponential delay between broker session attempts.
///
/// Starts at the initial delay, doubles per consecutive failure, and is
/// capped at the max delay. `reset` returns it to the initial delay.
pub struct ReconnectBackoff {
    builder: ExponentialBuilder,
    current: ExponentialBackoff,
    max_delay: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(initial)
            .with_max_delay(max)
            .with_factor(2.0)
            .with_max_times(usize::MAX);

        Self {
            builder,
            current: builder.build(),
            max_delay: max,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay())
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.current.next().unwrap_or(self.max_delay)
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.builder.build();
    }
}

/// Source of delays, so tests can run the reconnect loop without waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time via tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock for tests: records requested sleeps and returns immediately.
///
/// Optionally fires a shutdown trigger once a number of sleeps have been
/// requested, which bounds an otherwise endless reconnect loop.
#[derive(Clone, Default)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
    stop: Option<(usize, ShutdownTrigger)>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown when the `n`th sleep is requested.
    pub fn stop_after(n: usize, trigger: ShutdownTrigger) -> Self {
        Self {
            sleeps: Arc::default(),
            stop: Some((n, trigger)),
        }
    }

    pub async fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().await.clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        let mut sleeps = self.sleeps.lock().await;
        sleeps.push(duration);
        if let Some((n, trigger)) = &self.stop {
            if sleeps.len() >= *n {
                trigger.trigger();
            }
        }
        drop(sleeps);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<Duration> = (0..9).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 32, 60, 60, 60]));
    }

    #[test]
    fn test_reset_returns_to_initial_delay() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..5 {
            backoff.next_delay();
        }

        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_never_exhausts() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(4));
        for _ in 0..1_000 {
            assert!(backoff.next_delay() <= Duration::from_secs(4));
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_from_config_uses_configured_bounds() {
        let config = ReconnectConfig {
            initial_delay_ms: 2_000,
            max_delay_ms: 5_000,
            ..Default::default()
        };
        let mut backoff = ReconnectBackoff::from_config(&config);
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[2, 4, 5]));
    }

    #[tokio::test]
    async fn test_recording_clock_fires_trigger() {
        let (trigger, shutdown) = crate::shutdown::channel();
        let clock = RecordingClock::stop_after(2, trigger);

        clock.sleep(Duration::from_secs(1)).await;
        assert!(!shutdown.is_requested());
        clock.sleep(Duration::from_secs(2)).await;
        assert!(shutdown.is_requested());

        assert_eq!(clock.sleeps().await, secs(&[1, 2]));
    }
}
