//! libSQL state backend.
//!
//! One row per processed identifier in `processed_messages`. Each `record`
//! is a single autocommitted `INSERT OR IGNORE`, so it is durable as soon as
//! the call returns and `flush` has nothing left to do.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StateError;
use crate::store::migrations::{self, state_error};
use crate::store::traits::{ProcessedSet, StateStore};

/// libSQL-backed state store.
pub struct LibSqlStateStore {
    #[allow(dead_code)]
    db: LibSqlDatabase,
    conn: Connection,
    location: String,
    processed: ProcessedSet,
}

impl LibSqlStateStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StateError> {
        let location = path.display().to_string();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io {
                location: location.clone(),
                source: e,
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| state_error(&location, "Failed to open libSQL database", e))?;
        let store = Self::from_database(db, location).await?;
        info!(path = %path.display(), "State database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StateError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| state_error(":memory:", "Failed to create in-memory database", e))?;
        Self::from_database(db, ":memory:".to_string()).await
    }

    async fn from_database(db: LibSqlDatabase, location: String) -> Result<Self, StateError> {
        let conn = db
            .connect()
            .map_err(|e| state_error(&location, "Failed to create connection", e))?;
        migrations::run_migrations(&conn, &location).await?;
        Ok(Self {
            db,
            conn,
            location,
            processed: ProcessedSet::new(),
        })
    }

    fn corrupt(&self, reason: impl Into<String>) -> StateError {
        StateError::Corrupt {
            location: self.location.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl StateStore for LibSqlStateStore {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn load(&mut self) -> Result<ProcessedSet, StateError> {
        let mut rows = self
            .conn
            .query("SELECT id, processed_at FROM processed_messages", ())
            .await
            .map_err(|e| state_error(&self.location, "load", e))?;

        let mut processed = ProcessedSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| state_error(&self.location, "load", e))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| state_error(&self.location, "load id", e))?;
            let at: String = row
                .get(1)
                .map_err(|e| state_error(&self.location, "load processed_at", e))?;
            let at = DateTime::parse_from_rfc3339(&at)
                .map_err(|e| self.corrupt(format!("bad processed_at for {id}: {e}")))?
                .with_timezone(&Utc);
            processed.insert(id, at);
        }

        debug!(location = %self.location, count = processed.len(), "State loaded");
        self.processed = processed.clone();
        Ok(processed)
    }

    fn contains(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    async fn record(&mut self, id: &str) -> Result<(), StateError> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO processed_messages (id, processed_at) VALUES (?1, ?2)",
                params![id, now.to_rfc3339()],
            )
            .await
            .map_err(|e| state_error(&self.location, "record", e))?;
        self.processed.insert(id, now);
        debug!(id = id, "Recorded processed message");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_store_is_empty() {
        let mut store = LibSqlStateStore::new_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_then_contains() {
        let mut store = LibSqlStateStore::new_memory().await.unwrap();
        store.load().await.unwrap();
        store.record("msg-1").await.unwrap();
        assert!(store.contains("msg-1"));
        assert!(!store.contains("msg-2"));
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let mut store = LibSqlStateStore::new_memory().await.unwrap();
        store.record("msg-1").await.unwrap();
        store.record("msg-1").await.unwrap();
        let set = store.load().await.unwrap();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.db");

        {
            let mut store = LibSqlStateStore::new_local(&path).await.unwrap();
            store.record("msg-1").await.unwrap();
        }

        let mut reopened = LibSqlStateStore::new_local(&path).await.unwrap();
        let set = reopened.load().await.unwrap();
        assert!(set.contains("msg-1"));
    }

    #[tokio::test]
    async fn unparsable_timestamp_is_corrupt() {
        let mut store = LibSqlStateStore::new_memory().await.unwrap();
        store
            .conn
            .execute(
                "INSERT INTO processed_messages (id, processed_at) VALUES ('x', 'yesterday')",
                (),
            )
            .await
            .unwrap();
        assert!(matches!(
            store.load().await,
            Err(StateError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.db");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();

        let err = match LibSqlStateStore::new_local(&path).await {
            Ok(_) => panic!("garbage file opened as a database"),
            Err(e) => e,
        };
        assert!(matches!(err, StateError::Corrupt { .. }), "got {err:?}");
    }
}
