//! Persistence of processed readings.
//!
//! The store is reached through two narrow traits: [`LogStore`] opens
//! connections and [`LogConnection`] writes rows. [`StoreHandle`] owns the
//! single live connection of a processor and re-establishes it on demand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::model::PersistedLog;

pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

pub use mock::MockLogStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLogStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while persisting a log row.
///
/// All of them are treated as transient by the processor.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("Query build error: {0}")]
    Query(#[from] sea_query::error::Error),
}

/// Opens connections to the relational store.
///
/// Implementations:
/// - `PostgresLogStore`: PostgreSQL via sqlx
/// - `MockLogStore`: In-memory mock for testing
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open a fresh connection.
    async fn connect(&self) -> Result<Box<dyn LogConnection>>;
}

/// A single open connection to the store.
#[async_trait]
pub trait LogConnection: Send {
    /// Check whether the connection is still usable.
    async fn is_open(&mut self) -> bool;

    /// Insert one row. No upsert: every call adds a row.
    async fn insert(&mut self, log: &PersistedLog) -> Result<()>;

    /// Close the connection. Further calls report it as not open.
    async fn close(&mut self);
}

/// The processor's exclusively owned store connection.
///
/// Every write first verifies the held connection and reconnects if it is
/// gone. A connection that failed or timed out a write is discarded, so the
/// next write starts from a fresh one.
pub struct StoreHandle {
    store: Arc<dyn LogStore>,
    conn: Option<Box<dyn LogConnection>>,
    write_timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn LogStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            conn: None,
            write_timeout,
        }
    }

    /// Handle that starts out holding an already established connection.
    pub fn connected(
        store: Arc<dyn LogStore>,
        conn: Box<dyn LogConnection>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            conn: Some(conn),
            write_timeout,
        }
    }

    /// Establish the connection eagerly.
    pub async fn connect(&mut self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Persist one row within the write timeout.
    ///
    /// The timeout covers reconnecting as well as the insert itself.
    pub async fn insert(&mut self, log: &PersistedLog) -> Result<()> {
        let timeout = self.write_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            let conn = self.acquire().await?;
            conn.insert(log).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.discard();
                Err(e)
            }
            Err(_) => {
                self.discard();
                Err(StoreError::Timeout(timeout))
            }
        }
    }

    /// Close the held connection, if any.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
            info!("Store connection closed");
        }
    }

    async fn acquire(&mut self) -> Result<&mut Box<dyn LogConnection>> {
        let open = match self.conn.as_mut() {
            Some(conn) => conn.is_open().await,
            None => false,
        };

        if !open {
            if self.conn.take().is_some() {
                warn!("Store connection lost, reconnecting");
            }
            let conn = self.store.connect().await?;
            info!("Connected to store");
            self.conn = Some(conn);
        }

        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Connection("no connection after connect".to_string()))
    }

    fn discard(&mut self) {
        if self.conn.take().is_some() {
            debug!("Discarding store connection after failed write");
        }
    }
}
