//! Delivery processing: decode, validate, persist, decide.
//!
//! The processor is where every failure-policy decision is made:
//!
//! | Outcome                               | Row written | Decision          |
//! |---------------------------------------|-------------|-------------------|
//! | Body is not a reading                 | no          | `RejectNoRequeue` |
//! | Reading out of range                  | best effort | `Ack`             |
//! | Valid reading, write succeeded        | yes         | `Ack`             |
//! | Valid reading, write failed/timed out | no          | `NackRequeue`     |
//!
//! `Ack` for a valid reading is only ever returned after its row is durable.
//! `NackRequeue` is returned only after the requeue delay, so a store outage
//! does not turn into a tight redelivery loop.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::bus::{AckDecision, Delivery, DeliveryHandler};
use crate::model::{PersistedLog, Reading};
use crate::storage::StoreHandle;
use crate::validation::validate;

/// Default pause before a failed write is handed back for redelivery.
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Turns delivery bodies into persisted rows and ack decisions.
pub struct DeliveryProcessor {
    store: StoreHandle,
    requeue_delay: Duration,
}

impl DeliveryProcessor {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }

    pub fn with_requeue_delay(mut self, requeue_delay: Duration) -> Self {
        self.requeue_delay = requeue_delay;
        self
    }

    /// Process one raw delivery body.
    pub async fn process(&mut self, raw_body: &[u8]) -> AckDecision {
        let (reading, raw_payload) = match Reading::decode(raw_body) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    error = %e,
                    body = %String::from_utf8_lossy(raw_body),
                    "Failed to decode reading, rejecting"
                );
                return AckDecision::RejectNoRequeue;
            }
        };

        debug!(station_id = %reading.station_id, "Received reading");

        let outcome = validate(&reading);
        if !outcome.is_valid() {
            let message = outcome.joined();
            warn!(
                station_id = %reading.station_id,
                violations = %message,
                "Reading failed validation"
            );

            let log = PersistedLog::error(&reading, raw_payload, message);
            if let Err(e) = self.store.insert(&log).await {
                // Terminal either way: the reading is acknowledged.
                warn!(
                    station_id = %reading.station_id,
                    error = %e,
                    "Failed to record validation failure, dropping reading"
                );
            }
            return AckDecision::Ack;
        }

        let log = PersistedLog::ok(&reading, raw_payload);
        match self.store.insert(&log).await {
            Ok(()) => {
                info!(station_id = %reading.station_id, "Persisted reading");
                AckDecision::Ack
            }
            Err(e) => {
                error!(
                    station_id = %reading.station_id,
                    error = %e,
                    requeue_delay_ms = %self.requeue_delay.as_millis(),
                    "Failed to persist reading, requeueing"
                );
                tokio::time::sleep(self.requeue_delay).await;
                AckDecision::NackRequeue
            }
        }
    }

    /// Release the store connection.
    pub async fn close(&mut self) {
        self.store.close().await;
    }
}

#[async_trait]
impl DeliveryHandler for DeliveryProcessor {
    async fn handle(&mut self, delivery: &Delivery) -> AckDecision {
        self.process(&delivery.body).await
    }
}
