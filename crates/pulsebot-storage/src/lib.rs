//! pulsebot-storage: key-value persistence port.
//!
//! Scheduler run history and interaction-control snapshots are stored as
//! JSON documents under string keys. There are no transactions and no
//! cross-call locking: concurrent writers to one key race and the last
//! write wins.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Per-row write options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Row reads as absent once this many millis have passed since the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl EntryMetadata {
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            tags: Vec::new(),
        }
    }

    pub(crate) fn expires_at(&self, now_ms: i64) -> Option<i64> {
        self.ttl_ms
            .map(|ttl| now_ms.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)))
    }
}

/// Opaque key → JSON document store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a row. Missing and expired rows are both `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a row, replacing any previous one.
    async fn set(&self, key: &str, value: Value, metadata: Option<EntryMetadata>) -> Result<()>;

    /// Overwrite the value of a row, creating it when absent.
    async fn update(&self, key: &str, value: Value, metadata: Option<EntryMetadata>)
    -> Result<()>;
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_at() {
        assert_eq!(EntryMetadata::default().expires_at(1_000), None);
        assert_eq!(EntryMetadata::with_ttl(500).expires_at(1_000), Some(1_500));
        assert_eq!(
            EntryMetadata::with_ttl(u64::MAX).expires_at(1_000),
            Some(i64::MAX)
        );
    }

    #[test]
    fn test_metadata_serde() {
        let meta = EntryMetadata {
            ttl_ms: Some(10),
            tags: vec!["scheduler".into()],
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"ttl_ms":10,"tags":["scheduler"]}"#);
        assert_eq!(
            serde_json::to_string(&EntryMetadata::default()).unwrap(),
            "{}"
        );
    }
}
