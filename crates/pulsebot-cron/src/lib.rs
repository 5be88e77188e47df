//! pulsebot-cron: persistent, restart-safe job scheduler.
//!
//! Automation plugins register cron-scheduled jobs at startup. Every
//! heartbeat evaluates which jobs are due against their persisted `lastRun`
//! and runs them, recording the outcome back to the key-value store.

pub mod expression;
pub mod scheduler;
pub mod store;

pub use scheduler::Scheduler;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use pulsebot_types::JobSummary;

/// Boxed future returned by a job handler.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Async job handler function type.
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),
    #[error("Invalid cron expression `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("No upcoming occurrence for cron expression `{0}`")]
    NoUpcomingRun(String),
    #[error(transparent)]
    Config(#[from] pulsebot_config::ConfigError),
}

/// A named, cron-scheduled unit of work.
#[derive(Clone)]
pub struct Job {
    /// Unique job ID. Registering the same ID again replaces the job.
    pub id: String,
    /// Cron expression (e.g. "*/10 * * * *").
    pub schedule: String,
    pub handler: JobHandler,
    pub metadata: HashMap<String, Value>,
}

impl Job {
    pub fn new<F, Fut>(id: impl Into<String>, schedule: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            schedule: schedule.into(),
            handler: Arc::new(move || Box::pin(handler())),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            schedule: self.schedule.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("schedule", &self.schedule)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_job_handler_runs() {
        let job = Job::new("echo", "* * * * *", || async { Ok(json!({"ok": true})) })
            .with_metadata("plugin", json!("twitter"));
        let out = (job.handler)().await.unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(job.summary().metadata["plugin"], "twitter");
    }

    #[test]
    fn test_job_debug_omits_handler() {
        let job = Job::new("echo", "* * * * *", || async { Ok(Value::Null) });
        let dbg = format!("{job:?}");
        assert!(dbg.contains("echo"));
        assert!(!dbg.contains("handler"));
    }
}
