//! PostgreSQL implementation of the log store.
//!
//! One dedicated connection per processor, no pool: the processor writes
//! sequentially and must notice a dead connection before each write.

use async_trait::async_trait;
use sea_query::{PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::{debug, info, warn};

use super::schema::{WeatherLogs, CREATE_WEATHER_LOGS_TABLE};
use super::{LogConnection, LogStore, Result};
use crate::config::StoreConfig;
use crate::model::PersistedLog;

/// PostgreSQL implementation of LogStore.
pub struct PostgresLogStore {
    options: PgConnectOptions,
    address: String,
}

impl PostgresLogStore {
    /// Create a store from configuration. Does not connect.
    pub fn new(config: &StoreConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .application_name("weather-ingest");

        Self {
            options,
            address: config.address(),
        }
    }

    /// Create the `weather_logs` table if it does not exist.
    ///
    /// Safe to call multiple times - uses IF NOT EXISTS.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::raw_sql(CREATE_WEATHER_LOGS_TABLE)
            .execute(&mut conn)
            .await?;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close schema connection cleanly");
        }
        info!(store = %self.address, "Ensured weather_logs schema");
        Ok(())
    }

    /// Build the single-row insert for a log.
    fn insert_statement(log: &PersistedLog) -> Result<(String, sea_query_binder::SqlxValues)> {
        let (sql, values) = Query::insert()
            .into_table(WeatherLogs::Table)
            .columns([
                WeatherLogs::StationId,
                WeatherLogs::Timestamp,
                WeatherLogs::Temperature,
                WeatherLogs::Humidity,
                WeatherLogs::Pressure,
                WeatherLogs::Status,
                WeatherLogs::ErrorMessage,
                WeatherLogs::RawPayload,
            ])
            .values([
                log.station_id.clone().into(),
                log.timestamp.into(),
                log.temperature.into(),
                log.humidity.into(),
                log.pressure.into(),
                log.status.as_str().into(),
                log.error_message.clone().into(),
                log.raw_payload.clone().into(),
            ])?
            .build_sqlx(PostgresQueryBuilder);

        Ok((sql, values))
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn connect(&self) -> Result<Box<dyn LogConnection>> {
        let conn = PgConnection::connect_with(&self.options).await?;
        debug!(store = %self.address, "Opened PostgreSQL connection");
        Ok(Box::new(PostgresLogConnection { conn: Some(conn) }))
    }
}

/// A live PostgreSQL connection.
pub struct PostgresLogConnection {
    conn: Option<PgConnection>,
}

#[async_trait]
impl LogConnection for PostgresLogConnection {
    async fn is_open(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn insert(&mut self, log: &PersistedLog) -> Result<()> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            super::StoreError::Connection("PostgreSQL connection closed".to_string())
        })?;

        let (sql, values) = PostgresLogStore::insert_statement(log)?;
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        Ok(())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close PostgreSQL connection cleanly");
            }
        }
    }
}
