//! Mock broker implementation for testing.
//!
//! Sessions are scripted up front: each `establish` call consumes the next
//! script entry. Settlements from every session are recorded in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AckDecision, Broker, BusError, Delivery, Result, Session};

/// How a scripted session behaves once its deliveries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnding {
    /// Report a connection fault.
    Fault,
    /// Wait for more deliveries that never come.
    Idle,
    /// Stay quiet for the given time, then report a connection fault.
    FaultAfter(Duration),
}

enum Script {
    Refuse(String),
    Session {
        deliveries: VecDeque<Delivery>,
        ending: SessionEnding,
    },
}

#[derive(Default)]
struct MockState {
    scripts: RwLock<VecDeque<Script>>,
    settlements: RwLock<Vec<(u64, AckDecision)>>,
    fail_settle: RwLock<bool>,
    establish_attempts: AtomicUsize,
    closed_sessions: AtomicUsize,
}

/// Mock broker for testing.
///
/// Clones share state. Once the script runs out, further `establish` calls
/// fail as if the broker were down.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `establish` call fails.
    pub async fn push_refusal(&self, reason: impl Into<String>) {
        self.state
            .scripts
            .write()
            .await
            .push_back(Script::Refuse(reason.into()));
    }

    /// Next `establish` call yields a session serving `deliveries`.
    pub async fn push_session(&self, deliveries: Vec<Delivery>, ending: SessionEnding) {
        self.state.scripts.write().await.push_back(Script::Session {
            deliveries: deliveries.into(),
            ending,
        });
    }

    /// Make every settle call fail.
    pub async fn set_fail_settle(&self, fail: bool) {
        *self.state.fail_settle.write().await = fail;
    }

    pub async fn settlements(&self) -> Vec<(u64, AckDecision)> {
        self.state.settlements.read().await.clone()
    }

    pub fn establish_attempts(&self) -> usize {
        self.state.establish_attempts.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.state.closed_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn establish(&self) -> Result<Box<dyn Session>> {
        self.state.establish_attempts.fetch_add(1, Ordering::SeqCst);

        match self.state.scripts.write().await.pop_front() {
            Some(Script::Session { deliveries, ending }) => Ok(Box::new(MockSession {
                state: Arc::clone(&self.state),
                deliveries,
                ending,
            })),
            Some(Script::Refuse(reason)) => Err(BusError::Connection(reason)),
            None => Err(BusError::Connection("Mock broker unavailable".to_string())),
        }
    }
}

struct MockSession {
    state: Arc<MockState>,
    deliveries: VecDeque<Delivery>,
    ending: SessionEnding,
}

#[async_trait]
impl Session for MockSession {
    async fn next_delivery(&mut self) -> Result<Delivery> {
        if let Some(delivery) = self.deliveries.pop_front() {
            return Ok(delivery);
        }
        match self.ending {
            SessionEnding::Fault => Err(BusError::Connection("Mock connection reset".to_string())),
            SessionEnding::Idle => std::future::pending().await,
            SessionEnding::FaultAfter(quiet) => {
                tokio::time::sleep(quiet).await;
                Err(BusError::Connection("Mock heartbeat missed".to_string()))
            }
        }
    }

    async fn settle(&mut self, delivery: &Delivery, decision: AckDecision) -> Result<()> {
        if *self.state.fail_settle.read().await {
            return Err(BusError::Settle {
                tag: delivery.tag,
                message: "Mock channel closed".to_string(),
            });
        }
        self.state
            .settlements
            .write()
            .await
            .push((delivery.tag, decision));
        Ok(())
    }

    async fn close(&mut self) {
        self.state.closed_sessions.fetch_add(1, Ordering::SeqCst);
    }
}
