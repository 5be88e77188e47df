//! SQLite-backed key-value store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{EntryMetadata, KvStore, Result, now_ms};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        metadata TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        expires_at INTEGER
    );";

/// Key-value rows in a single SQLite table.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("KV store opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Delete every expired row. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.clone();
        let now = now_ms();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let removed = conn.execute(
                "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                rusqlite::params![now],
            )?;
            Ok(removed)
        })
        .await?
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        metadata: Option<EntryMetadata>,
        keep_created_at: bool,
    ) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = serde_json::to_string(&value)?;
        let now = now_ms();
        let expires_at = metadata.as_ref().and_then(|m| m.expires_at(now));
        let metadata = metadata.map(|m| serde_json::to_string(&m)).transpose()?;
        let sql = if keep_created_at {
            "INSERT INTO kv_entries (key, value, metadata, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at"
        } else {
            "INSERT OR REPLACE INTO kv_entries (key, value, metadata, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)"
        };
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(sql, rusqlite::params![key, value, metadata, now, expires_at])?;
            Ok(())
        })
        .await?
    }

    #[cfg(test)]
    async fn created_at(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let created = conn
                .query_row(
                    "SELECT created_at FROM kv_entries WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(created)
        })
        .await?
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let now = now_ms();
        let raw: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT value FROM kv_entries
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                rusqlite::params![key, now],
                |row| row.get(0),
            )
            .optional()
        })
        .await??;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, metadata: Option<EntryMetadata>) -> Result<()> {
        self.write(key, value, metadata, false).await
    }

    async fn update(
        &self,
        key: &str,
        value: Value,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        self.write(key, value, metadata, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store
            .set("job:poll:lastRun", json!("2024-03-01T12:00:00Z"), None)
            .await
            .unwrap();

        let loaded = store.get("job:poll:lastRun").await.unwrap();
        assert_eq!(loaded, Some(json!("2024-03-01T12:00:00Z")));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.set("k", json!({"a": 1}), None).await.unwrap();
        store.set("k", json!({"a": 2}), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 2})));
    }

    #[tokio::test]
    async fn test_update_creates_missing_row() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.update("fresh", json!([1, 2]), None).await.unwrap();
        assert_eq!(store.get("fresh").await.unwrap(), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.set("k", json!(1), None).await.unwrap();
        let created = store.created_at("k").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.update("k", json!(2), None).await.unwrap();

        assert_eq!(store.created_at("k").await.unwrap(), Some(created));
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_expired_rows_read_as_absent() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store
            .set("short", json!("x"), Some(EntryMetadata::with_ttl(0)))
            .await
            .unwrap();
        store
            .set("long", json!("y"), Some(EntryMetadata::with_ttl(60_000)))
            .await
            .unwrap();

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.get("long").await.unwrap(), Some(json!("y")));

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SqliteKvStore::open(&path).unwrap();
            store
                .set("twitter:interaction_controls", json!({"controls": {}}), None)
                .await
                .unwrap();
        }
        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(
            store.get("twitter:interaction_controls").await.unwrap(),
            Some(json!({"controls": {}}))
        );
    }
}
