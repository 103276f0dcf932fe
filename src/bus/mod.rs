//! Broker session management.
//!
//! This module contains:
//! - `Broker` / `Session` traits: connection lifecycle and manual-ack delivery pull
//! - `DeliveryHandler` trait: decides the disposition of each delivery
//! - `run_session`: the one-at-a-time consume loop
//! - `supervisor`: reconnect loop with backoff
//! - Implementations: AMQP (RabbitMQ), Mock

use async_trait::async_trait;
use tracing::{debug, error, info_span, Instrument};

use crate::shutdown::Shutdown;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;
pub mod supervisor;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use mock::MockBroker;
pub use supervisor::{ConsumerSupervisor, SessionState};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
///
/// Every variant ends the current session; the supervisor reconnects.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Failed to settle delivery {tag}: {message}")]
    Settle { tag: u64, message: String },

    #[error("Delivery stream closed")]
    StreamClosed,

    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// How the broker should dispose of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processing is complete; remove the message.
    Ack,
    /// Permanently unprocessable; discard (or dead-letter) without retry.
    RejectNoRequeue,
    /// Transient failure; return the message to the queue for redelivery.
    NackRequeue,
}

/// A message handed over by the broker, pending settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag, scoped to the channel it arrived on.
    pub tag: u64,
    pub routing_key: String,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(tag: u64, routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            routing_key: routing_key.into(),
            redelivered: false,
            body: body.into(),
        }
    }

    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

/// Decides what happens to each delivery.
///
/// Called sequentially; the next delivery is not pulled until the returned
/// decision has been applied.
#[async_trait]
pub trait DeliveryHandler: Send {
    async fn handle(&mut self, delivery: &Delivery) -> AckDecision;
}

/// Establishes broker sessions.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via lapin
/// - `MockBroker`: Scripted in-memory sessions for testing
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection, declare topology, and start consuming.
    ///
    /// Topology declaration is idempotent, so this is safe on every
    /// reconnect.
    async fn establish(&self) -> Result<Box<dyn Session>>;
}

/// A live, consuming broker session.
#[async_trait]
pub trait Session: Send {
    /// Wait for the next delivery. Any error means the session is dead.
    async fn next_delivery(&mut self) -> Result<Delivery>;

    /// Apply a decision to a delivery received on this session.
    async fn settle(&mut self, delivery: &Delivery, decision: AckDecision) -> Result<()>;

    /// Tear the session down. Unsettled deliveries return to the queue.
    async fn close(&mut self);
}

// ============================================================================
// Consume loop
// ============================================================================

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested between deliveries.
    Shutdown,
    /// Connection-level fault; the session must be rebuilt.
    Fault(BusError),
}

/// Outcome of one `run_session` call.
#[derive(Debug)]
pub struct SessionSummary {
    /// Deliveries handled and settled during the session.
    pub settled: u64,
    pub end: SessionEnd,
}

/// Deliver each message of a session to `handler`, one at a time.
///
/// The handler's decision is applied before the next delivery is pulled.
/// Shutdown is only observed while waiting for a delivery, so an in-flight
/// delivery is always handled and settled first.
pub async fn run_session<H>(
    session: &mut dyn Session,
    handler: &mut H,
    shutdown: &mut Shutdown,
) -> SessionSummary
where
    H: DeliveryHandler + ?Sized,
{
    let mut settled = 0;

    loop {
        if shutdown.is_requested() {
            return SessionSummary {
                settled,
                end: SessionEnd::Shutdown,
            };
        }

        let delivery = tokio::select! {
            biased;
            _ = shutdown.requested() => {
                return SessionSummary { settled, end: SessionEnd::Shutdown };
            }
            next = session.next_delivery() => match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(error = %e, "Consumer delivery error, will reconnect");
                    return SessionSummary { settled, end: SessionEnd::Fault(e) };
                }
            },
        };

        let span = info_span!(
            "delivery",
            tag = delivery.tag,
            routing_key = %delivery.routing_key,
            redelivered = delivery.redelivered
        );

        let decision = handler.handle(&delivery).instrument(span.clone()).await;

        if let Err(e) = session
            .settle(&delivery, decision)
            .instrument(span.clone())
            .await
        {
            error!(parent: &span, error = %e, ?decision, "Failed to settle delivery");
            return SessionSummary {
                settled,
                end: SessionEnd::Fault(e),
            };
        }

        debug!(parent: &span, ?decision, "Delivery settled");
        settled += 1;
    }
}
