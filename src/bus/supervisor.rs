//! Consumer supervision: keep a broker session alive for the life of the
//! process.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Consuming
//!      ^                        |                  |
//!      +------- fault ----------+------ fault -----+
//! ```
//!
//! Every fault is followed by an exponential pause. The pause resets to the
//! initial delay once a session has settled at least one delivery, or has
//! stayed in `Consuming` for the stable period.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{run_session, Broker, DeliveryHandler, SessionEnd};
use crate::shutdown::Shutdown;
use crate::utils::backoff::{Clock, ReconnectBackoff};

/// Connection state of the supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Consuming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Consuming => "consuming",
        };
        f.write_str(name)
    }
}

/// Default time a session must stay up to count as healthy.
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(30);

/// Runs broker sessions back to back until shutdown.
pub struct ConsumerSupervisor<H> {
    broker: Arc<dyn Broker>,
    handler: H,
    clock: Arc<dyn Clock>,
    backoff: ReconnectBackoff,
    stable_after: Duration,
    state: SessionState,
}

impl<H: DeliveryHandler> ConsumerSupervisor<H> {
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: H,
        clock: Arc<dyn Clock>,
        backoff: ReconnectBackoff,
    ) -> Self {
        Self {
            broker,
            handler,
            clock,
            backoff,
            stable_after: DEFAULT_STABLE_AFTER,
            state: SessionState::Disconnected,
        }
    }

    /// Uptime after which a faulted session still resets the backoff.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Consume until `shutdown` is requested.
    ///
    /// Never returns because of a broker fault: every fault leads to a
    /// pause and a new session.
    pub async fn run(&mut self, mut shutdown: Shutdown) {
        loop {
            if shutdown.is_requested() {
                break;
            }

            self.transition(SessionState::Connecting);
            let established = tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                established = self.broker.establish() => established,
            };

            let mut session = match established {
                Ok(session) => session,
                Err(e) => {
                    self.transition(SessionState::Disconnected);
                    error!(error = %e, "Failed to set up consumer");
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.transition(SessionState::Consuming);
            let started = Instant::now();
            let summary = run_session(session.as_mut(), &mut self.handler, &mut shutdown).await;
            let uptime = started.elapsed();
            session.close().await;
            self.transition(SessionState::Disconnected);

            match summary.end {
                SessionEnd::Shutdown => break,
                SessionEnd::Fault(e) => {
                    if summary.settled > 0 || uptime >= self.stable_after {
                        self.backoff.reset();
                    }
                    warn!(
                        error = %e,
                        settled = summary.settled,
                        uptime_ms = %uptime.as_millis(),
                        "Consumer session lost"
                    );
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.transition(SessionState::Disconnected);
        info!("Consumer stopped");
    }

    /// Wait out the next backoff delay. Returns false if shutdown was
    /// requested meanwhile.
    async fn pause(&mut self, shutdown: &mut Shutdown) -> bool {
        let delay = self.backoff.next_delay();
        info!(backoff_ms = %delay.as_millis(), "Reconnecting after backoff");

        tokio::select! {
            biased;
            _ = shutdown.requested() => false,
            _ = self.clock.sleep(delay) => !shutdown.is_requested(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::bus::mock::SessionEnding;
    use crate::bus::{AckDecision, Delivery, MockBroker};
    use crate::shutdown;
    use crate::utils::backoff::RecordingClock;

    struct AckAll {
        seen: Vec<(u64, bool)>,
    }

    #[async_trait]
    impl DeliveryHandler for AckAll {
        async fn handle(&mut self, delivery: &Delivery) -> AckDecision {
            self.seen.push((delivery.tag, delivery.redelivered));
            AckDecision::Ack
        }
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    fn supervisor(
        broker: &MockBroker,
        clock: &RecordingClock,
    ) -> ConsumerSupervisor<AckAll> {
        ConsumerSupervisor::new(
            Arc::new(broker.clone()),
            AckAll { seen: Vec::new() },
            Arc::new(clock.clone()),
            ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn test_backoff_grows_while_broker_is_down() {
        let broker = MockBroker::new();
        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(8, trigger);
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        assert_eq!(clock.sleeps().await, secs(&[1, 2, 4, 8, 16, 32, 60, 60]));
        assert_eq!(broker.establish_attempts(), 8);
        assert_eq!(supervisor.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnects_after_fault_and_resets_backoff() {
        let broker = MockBroker::new();
        broker.push_refusal("down").await;
        broker.push_refusal("down").await;
        broker
            .push_session(vec![Delivery::new(1, "station.a", "{}")], SessionEnding::Fault)
            .await;
        broker
            .push_session(
                vec![Delivery::new(1, "station.a", "{}").redelivered()],
                SessionEnding::Fault,
            )
            .await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(5, trigger);
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        // Two refusals back off 1s then 2s. Each productive session resets
        // the schedule, then the exhausted script backs off again.
        assert_eq!(clock.sleeps().await, secs(&[1, 2, 1, 1, 2]));
        assert_eq!(
            supervisor.handler_mut().seen,
            vec![(1, false), (1, true)]
        );
        assert_eq!(broker.closed_sessions(), 2);
        assert_eq!(
            broker.settlements().await,
            vec![(1, AckDecision::Ack), (1, AckDecision::Ack)]
        );
    }

    #[tokio::test]
    async fn test_unproductive_session_does_not_reset_backoff() {
        let broker = MockBroker::new();
        broker.push_refusal("down").await;
        broker.push_session(vec![], SessionEnding::Fault).await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(3, trigger);
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        assert_eq!(clock.sleeps().await, secs(&[1, 2, 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_quiet_session_resets_backoff() {
        let broker = MockBroker::new();
        broker.push_refusal("down").await;
        broker.push_refusal("down").await;
        broker
            .push_session(vec![], SessionEnding::FaultAfter(Duration::from_secs(45)))
            .await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(4, trigger);
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        assert_eq!(clock.sleeps().await, secs(&[1, 2, 1, 2]));
        assert_eq!(broker.closed_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_quiet_session_keeps_backoff() {
        let broker = MockBroker::new();
        broker.push_refusal("down").await;
        broker
            .push_session(vec![], SessionEnding::FaultAfter(Duration::from_secs(5)))
            .await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(3, trigger);
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        assert_eq!(clock.sleeps().await, secs(&[1, 2, 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_period_is_configurable() {
        let broker = MockBroker::new();
        broker.push_refusal("down").await;
        broker
            .push_session(vec![], SessionEnding::FaultAfter(Duration::from_secs(5)))
            .await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::stop_after(3, trigger);
        let mut supervisor = supervisor(&broker, &clock).with_stable_after(Duration::from_secs(5));

        supervisor.run(shutdown).await;

        assert_eq!(clock.sleeps().await, secs(&[1, 1, 2]));
    }

    #[tokio::test]
    async fn test_shutdown_while_consuming_closes_session() {
        let broker = MockBroker::new();
        broker
            .push_session(vec![Delivery::new(1, "station.a", "{}")], SessionEnding::Idle)
            .await;

        let (trigger, shutdown) = shutdown::channel();
        let clock = RecordingClock::new();
        let mut supervisor = supervisor(&broker, &clock);

        let observed = broker.clone();
        let stopper = tokio::spawn(async move {
            while observed.settlements().await.is_empty() {
                tokio::task::yield_now().await;
            }
            trigger.trigger();
        });

        supervisor.run(shutdown).await;
        stopper.await.unwrap();

        assert!(clock.sleeps().await.is_empty());
        assert_eq!(broker.establish_attempts(), 1);
        assert_eq!(broker.closed_sessions(), 1);
        assert_eq!(broker.settlements().await, vec![(1, AckDecision::Ack)]);
        assert_eq!(supervisor.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_does_nothing() {
        let broker = MockBroker::new();
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let clock = RecordingClock::new();
        let mut supervisor = supervisor(&broker, &clock);

        supervisor.run(shutdown).await;

        assert_eq!(broker.establish_attempts(), 0);
    }
}
