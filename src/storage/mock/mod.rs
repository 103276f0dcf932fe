//! Mock log store implementation for testing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LogConnection, LogStore, Result, StoreError};
use crate::model::PersistedLog;

struct MockState {
    rows: RwLock<Vec<PersistedLog>>,
    available: RwLock<bool>,
    fail_writes: RwLock<bool>,
    hang_writes: RwLock<bool>,
    connects: AtomicUsize,
    open: AtomicUsize,
    generation: AtomicU64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            available: RwLock::new(true),
            fail_writes: RwLock::new(false),
            hang_writes: RwLock::new(false),
            connects: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }
}

/// Mock store that keeps rows in memory.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the processor owns another.
#[derive(Clone, Default)]
pub struct MockLogStore {
    state: Arc<MockState>,
}

impl MockLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub async fn set_available(&self, available: bool) {
        *self.state.available.write().await = available;
    }

    /// Make inserts fail while the connection stays open.
    pub async fn set_fail_writes(&self, fail: bool) {
        *self.state.fail_writes.write().await = fail;
    }

    /// Make inserts block forever.
    pub async fn set_hang_writes(&self, hang: bool) {
        *self.state.hang_writes.write().await = hang;
    }

    /// Server-side disconnect of every open connection.
    pub async fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn rows(&self) -> Vec<PersistedLog> {
        self.state.rows.read().await.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub async fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MockLogStore {
    async fn connect(&self) -> Result<Box<dyn LogConnection>> {
        if !*self.state.available.read().await {
            return Err(StoreError::Connection(
                "Mock store unavailable".to_string(),
            ));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    generation: u64,
    closed: bool,
}

impl MockConnection {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl LogConnection for MockConnection {
    async fn is_open(&mut self) -> bool {
        !self.closed
            && self.generation == self.state.generation.load(Ordering::SeqCst)
            && *self.state.available.read().await
    }

    async fn insert(&mut self, log: &PersistedLog) -> Result<()> {
        if *self.state.hang_writes.read().await {
            std::future::pending::<()>().await;
        }
        if !self.is_open().await {
            return Err(StoreError::Unavailable("Mock connection closed".to_string()));
        }
        if *self.state.fail_writes.read().await {
            return Err(StoreError::Unavailable("Mock write failure".to_string()));
        }
        self.state.rows.write().await.push(log.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reading;

    fn sample_log() -> PersistedLog {
        let body = br#"{"station_id":"ST-9","timestamp":"2024-06-01T12:00:00Z","temperature":1,"humidity":2,"pressure":1000}"#;
        let (reading, raw) = Reading::decode(body).unwrap();
        PersistedLog::ok(&reading, raw)
    }

    #[tokio::test]
    async fn test_mock_store_insert_and_read_back() {
        let store = MockLogStore::new();
        let mut conn = store.connect().await.unwrap();

        conn.insert(&sample_log()).await.unwrap();

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].station_id, "ST-9");
    }

    #[tokio::test]
    async fn test_mock_store_unavailable_rejects_connect() {
        let store = MockLogStore::new();
        store.set_available(false).await;

        assert!(store.connect().await.is_err());
        assert_eq!(store.connect_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_store_dropped_connection_reports_closed() {
        let store = MockLogStore::new();
        let mut conn = store.connect().await.unwrap();
        assert!(conn.is_open().await);

        store.drop_connections().await;

        assert!(!conn.is_open().await);
        assert!(conn.insert(&sample_log()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_store_tracks_open_connections() {
        let store = MockLogStore::new();
        let mut first = store.connect().await.unwrap();
        let second = store.connect().await.unwrap();
        assert_eq!(store.open_connections().await, 2);

        first.close().await;
        drop(second);

        assert_eq!(store.open_connections().await, 0);
    }
}
