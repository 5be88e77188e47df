use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ──────────────────── Job Types ────────────────────

/// Outcome of a single job execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Error,
}

/// Result of one job execution, persisted under `lastResult` / `lastError`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    pub status: JobOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobResult {
    pub fn success(job_id: impl Into<String>, timestamp: DateTime<Utc>, result: Value) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobOutcome::Success,
            error: None,
            timestamp,
            result: (!result.is_null()).then_some(result),
        }
    }

    pub fn error(
        job_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobOutcome::Error,
            error: Some(message.into()),
            timestamp,
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobOutcome::Success
    }
}

/// Echo of a job registration, persisted under `config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigRecord {
    pub id: String,
    pub schedule: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub registered_at: DateTime<Utc>,
}

/// Persisted run history of a job. Every row may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JobConfigRecord>,
}

/// In-memory view of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub schedule: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// What a heartbeat did: the results of every job that ran on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<JobResult>,
}

// ──────────────────── Interaction Types ────────────────────

/// Per-thread interaction state.
///
/// `is_muted` is terminal: no operation ever resets it to `false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadControl {
    pub is_muted: bool,
    /// Unix millis. Missing reads as 0, which makes the entry eligible for cleanup.
    #[serde(default)]
    pub last_interaction_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute_reason: Option<String>,
    #[serde(default)]
    pub depth: u32,
}

/// A social post (or message) the automation may act on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    /// Conversation / root identifier. Falls back to `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub retweets: Option<u64>,
    #[serde(default)]
    pub replies: Option<u64>,
    #[serde(default)]
    pub bookmark_count: Option<u64>,
    #[serde(default)]
    pub views: Option<u64>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// The thread this candidate belongs to, if one can be derived.
    pub fn thread_id(&self) -> Option<&str> {
        self.conversation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| Some(self.id.as_str()).filter(|id| !id.is_empty()))
    }
}

/// Gate verdict for a candidate action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionDecision {
    pub interact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InteractionDecision {
    pub fn allow() -> Self {
        Self {
            interact: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            interact: false,
            reason: Some(reason.into()),
        }
    }
}

/// Control directive recognised in generated text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    NoResponse,
    MuteThread,
}

impl ControlType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoResponse => "NO_RESPONSE",
            Self::MuteThread => "MUTE_THREAD",
        }
    }
}

/// Result of scanning model output for control directives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub should_post: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<ControlType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlResponse {
    pub fn post() -> Self {
        Self {
            should_post: true,
            control_type: None,
            reason: None,
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            should_post: false,
            control_type: None,
            reason: Some(reason.into()),
        }
    }

    pub fn directive(control_type: ControlType) -> Self {
        Self {
            should_post: false,
            control_type: Some(control_type),
            reason: None,
        }
    }
}

/// Outcome of an idle-thread cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub cleaned: usize,
    pub timestamp: DateTime<Utc>,
}
