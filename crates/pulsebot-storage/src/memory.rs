//! Process-local key-value store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{EntryMetadata, KvStore, Result, now_ms};

struct MemoryEntry {
    value: Value,
    expires_at: Option<i64>,
}

/// `HashMap`-backed store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) rows.
    pub async fn len(&self) -> usize {
        let now = now_ms();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn write(&self, key: &str, value: Value, metadata: Option<EntryMetadata>) {
        let expires_at = metadata.and_then(|m| m.expires_at(now_ms()));
        self.entries
            .write()
            .await
            .insert(key.to_string(), MemoryEntry { value, expires_at });
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = now_ms();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, metadata: Option<EntryMetadata>) -> Result<()> {
        self.write(key, value, metadata).await;
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        value: Value,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        self.write(key, value, metadata).await;
        Ok(())
    }
}
