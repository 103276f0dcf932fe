//! weather-consumer: station reading ingest daemon
//!
//! Consumes readings from a RabbitMQ topic exchange, validates them, and
//! writes one `weather_logs` row per processed delivery.
//!
//! ## Architecture
//! ```text
//! [Stations] -> [weather exchange] -> [weather_queue] -> [weather-consumer] -> [PostgreSQL]
//! ```
//!
//! ## Configuration
//! - `--config <path>` or WEATHER_CONFIG: YAML configuration file
//! - WEATHER__BROKER__*, WEATHER__STORE__*, WEATHER__RECONNECT__*: overrides
//! - RABBITMQ_HOST/PORT/USER/PASS/VHOST, EXCHANGE, QUEUE: broker overrides
//! - PGHOST/PGPORT/PGUSER/PGPASSWORD/PGDATABASE: store overrides
//! - WEATHER_LOG: tracing filter (default "info")
//! - WEATHER_LOG_FORMAT=json: structured logs
//!
//! ## Lifecycle
//! Exits non-zero only when the store cannot be reached within the startup
//! retry budget. Broker outages are retried forever. SIGTERM/SIGINT stop intake,
//! finishes the in-flight delivery, and closes both connections.

use std::sync::Arc;

use tracing::{error, info};

use weather_ingest::bus::{AmqpBroker, ConsumerSupervisor};
use weather_ingest::config::Config;
use weather_ingest::processor::DeliveryProcessor;
use weather_ingest::shutdown;
use weather_ingest::storage::{LogStore, PostgresLogStore, StoreHandle};
use weather_ingest::utils::backoff::{ReconnectBackoff, TokioClock};
use weather_ingest::utils::bootstrap::{
    connect_with_retry, init_tracing, parse_config_path, wait_for_signal,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        broker = %config.broker.redacted_url(),
        queue = %config.broker.queue,
        "Starting weather-consumer"
    );

    let store_config = &config.store;
    let address = store_config.address();
    let store = Arc::new(PostgresLogStore::new(store_config));

    if store_config.ensure_schema {
        connect_with_retry(
            "postgres",
            &address,
            store_config.connect_attempts,
            store_config.connect_delay(),
            || store.ensure_schema(),
        )
        .await?;
    }

    let conn = connect_with_retry(
        "postgres",
        &address,
        store_config.connect_attempts,
        store_config.connect_delay(),
        || store.connect(),
    )
    .await?;
    let handle = StoreHandle::connected(store.clone(), conn, store_config.write_timeout());

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    let processor = DeliveryProcessor::new(handle).with_requeue_delay(store_config.requeue_delay());
    let mut supervisor = ConsumerSupervisor::new(
        Arc::new(AmqpBroker::new(config.broker.clone())),
        processor,
        Arc::new(TokioClock),
        ReconnectBackoff::from_config(&config.reconnect),
    )
    .with_stable_after(config.reconnect.stable_after());

    supervisor.run(shutdown).await;
    supervisor.into_handler().close().await;

    info!("weather-consumer stopped");
    Ok(())
}
