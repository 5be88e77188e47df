//! Persisted per-job run history on top of the key-value port.
//!
//! Rows live under `job:<id>:<field>` where field is one of `lastRun`,
//! `lastResult`, `lastError` or `config`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use pulsebot_storage::{EntryMetadata, KvStore, Result};
use pulsebot_types::{JobConfigRecord, JobResult, JobStatus};

const LAST_RUN: &str = "lastRun";
const LAST_RESULT: &str = "lastResult";
const LAST_ERROR: &str = "lastError";
const CONFIG: &str = "config";

/// Run history for every registered job.
pub struct JobStateStore {
    kv: Arc<dyn KvStore>,
    result_ttl_ms: u64,
}

impl JobStateStore {
    /// `result_ttl_ms` is the expiry hint for `lastResult` / `lastError`.
    pub fn new(kv: Arc<dyn KvStore>, result_ttl_ms: u64) -> Self {
        Self { kv, result_ttl_ms }
    }

    pub fn key(job_id: &str, field: &str) -> String {
        format!("job:{job_id}:{field}")
    }

    pub async fn last_run(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.read(job_id, LAST_RUN).await
    }

    /// Record a successful run. `lastRun` never moves backwards.
    pub async fn record_success(&self, result: &JobResult, now: DateTime<Utc>) -> Result<()> {
        let previous = self.last_run(&result.job_id).await?;
        let last_run = previous.map_or(now, |prev| prev.max(now));
        self.write(&result.job_id, LAST_RUN, &last_run, None).await?;
        self.write(
            &result.job_id,
            LAST_RESULT,
            result,
            Some(EntryMetadata::with_ttl(self.result_ttl_ms)),
        )
        .await
    }

    /// Record a failed run. `lastRun` is left untouched.
    pub async fn record_failure(&self, result: &JobResult) -> Result<()> {
        self.write(
            &result.job_id,
            LAST_ERROR,
            result,
            Some(EntryMetadata::with_ttl(self.result_ttl_ms)),
        )
        .await
    }

    pub async fn save_config(&self, record: &JobConfigRecord) -> Result<()> {
        self.write(&record.id, CONFIG, record, None).await
    }

    /// All four rows for a job. Unreadable rows are logged and reported absent.
    pub async fn status(&self, job_id: &str) -> JobStatus {
        JobStatus {
            last_run: self.read_or_log(job_id, LAST_RUN).await,
            last_result: self.read_or_log(job_id, LAST_RESULT).await,
            last_error: self.read_or_log(job_id, LAST_ERROR).await,
            config: self.read_or_log(job_id, CONFIG).await,
        }
    }

    async fn read<T: DeserializeOwned>(&self, job_id: &str, field: &str) -> Result<Option<T>> {
        match self.kv.get(&Self::key(job_id, field)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn read_or_log<T: DeserializeOwned>(&self, job_id: &str, field: &str) -> Option<T> {
        match self.read(job_id, field).await {
            Ok(value) => value,
            Err(e) => {
                warn!(job_id = %job_id, field, "Failed to read job state: {e}");
                None
            }
        }
    }

    async fn write<T: Serialize>(
        &self,
        job_id: &str,
        field: &str,
        value: &T,
        metadata: Option<EntryMetadata>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.kv.set(&Self::key(job_id, field), value, metadata).await
    }
}
