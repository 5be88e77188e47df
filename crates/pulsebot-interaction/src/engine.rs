//! Interaction-control engine: the stateful gate in front of every automated reply.
//!
//! One engine per automation plugin. Thread controls and the dedup set live
//! in memory and are written through to the key-value store as a single
//! snapshot under `<plugin_prefix>interaction_controls`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pulsebot_config::InteractionConfig;
use pulsebot_cron::Job;
use pulsebot_storage::KvStore;
use pulsebot_types::{
    Candidate, CleanupReport, ControlType, InteractionDecision, ThreadControl,
};

use crate::control::{detect_control_response, find_keyword};
use crate::engagement::calculate_engagement_score;
use crate::processed::{PROCESSED_CAPACITY, ProcessedItems};

pub const NO_THREAD_ID: &str = "No thread ID available";
pub const ALREADY_PROCESSED: &str = "Already processed";
pub const THREAD_MUTED: &str = "Thread muted";
pub const THREAD_DEPTH_EXCEEDED: &str = "Thread depth exceeded";
pub const NO_RESPONSE_KEYWORD: &str = "No response keyword detected";
pub const LOW_ENGAGEMENT: &str = "Low engagement score";
pub const RANDOM_SKIP: &str = "Random skip";
pub const MODEL_REQUESTED_MUTE: &str = "Model requested thread mute";

/// Source of the uniform draw behind the random-skip check.
pub trait RandomSource: Send {
    /// Uniform sample in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

impl<R: RngCore + Send> RandomSource for R {
    fn next_f64(&mut self) -> f64 {
        self.random::<f64>()
    }
}

/// Persisted form of the engine state.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSnapshot {
    #[serde(default)]
    pub controls: HashMap<String, ThreadControl>,
    /// Oldest first.
    #[serde(default)]
    pub processed_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Default)]
struct EngineState {
    controls: HashMap<String, ThreadControl>,
    processed: ProcessedItems,
}

pub struct InteractionControl {
    store: Arc<dyn KvStore>,
    cache_key: String,
    config: InteractionConfig,
    state: Mutex<EngineState>,
    rng: std::sync::Mutex<Box<dyn RandomSource>>,
}

impl InteractionControl {
    /// Build an engine and hydrate it from the store.
    ///
    /// A missing or unreadable snapshot leaves the engine empty.
    pub async fn initialize(store: Arc<dyn KvStore>, config: InteractionConfig) -> Self {
        let engine = Self::new(store, config);
        engine.load_from_cache().await;
        engine
    }

    /// Build an empty engine without touching the store.
    pub fn new(store: Arc<dyn KvStore>, config: InteractionConfig) -> Self {
        Self {
            store,
            cache_key: format!("{}interaction_controls", config.plugin_prefix),
            config,
            state: Mutex::new(EngineState::default()),
            rng: std::sync::Mutex::new(Box::new(StdRng::from_os_rng())),
        }
    }

    /// Replace the random source (e.g. a seeded RNG in tests).
    pub fn with_random_source(self, source: impl RandomSource + 'static) -> Self {
        Self {
            rng: std::sync::Mutex::new(Box::new(source)),
            ..self
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_random_source(StdRng::seed_from_u64(seed))
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Replace in-memory state with the persisted snapshot, if any.
    pub async fn load_from_cache(&self) {
        let snapshot = match self.store.get(&self.cache_key).await {
            Ok(Some(value)) => match serde_json::from_value::<ControlSnapshot>(value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(key = %self.cache_key, "Ignoring unreadable interaction snapshot: {e}");
                    return;
                }
            },
            Ok(None) => {
                debug!(key = %self.cache_key, "No interaction snapshot, starting empty");
                return;
            }
            Err(e) => {
                warn!(key = %self.cache_key, "Failed to load interaction snapshot: {e}");
                return;
            }
        };

        let mut state = self.state.lock().await;
        state.processed = ProcessedItems::from_ordered(snapshot.processed_items, PROCESSED_CAPACITY);
        state.controls = snapshot.controls;
        info!(
            key = %self.cache_key,
            threads = state.controls.len(),
            processed = state.processed.len(),
            "Loaded interaction controls"
        );
    }

    // ─── Gating ─────────────────────────────────────────────

    /// Gate a candidate before generating a reply.
    pub async fn should_interact(&self, candidate: &Candidate) -> InteractionDecision {
        let decision = self.evaluate(candidate).await;
        debug!(
            candidate_id = %candidate.id,
            interact = decision.interact,
            reason = decision.reason.as_deref().unwrap_or_default(),
            "Interaction decision"
        );
        decision
    }

    async fn evaluate(&self, candidate: &Candidate) -> InteractionDecision {
        let Some(thread_id) = candidate.thread_id() else {
            return InteractionDecision::reject(NO_THREAD_ID);
        };

        let (processed, control) = {
            let state = self.state.lock().await;
            (
                state.processed.contains(&candidate.id),
                state.controls.get(thread_id).cloned(),
            )
        };

        if processed {
            return InteractionDecision::reject(ALREADY_PROCESSED);
        }

        if let Some(control) = &control {
            if control.is_muted {
                return InteractionDecision::reject(
                    control.mute_reason.as_deref().unwrap_or(THREAD_MUTED),
                );
            }
            if control.depth > self.config.max_thread_depth {
                self.mute_thread(thread_id, THREAD_DEPTH_EXCEEDED).await;
                return InteractionDecision::reject(THREAD_DEPTH_EXCEEDED);
            }
        }

        if find_keyword(&candidate.text, &self.config.no_response_keywords).is_some() {
            self.mute_thread(thread_id, NO_RESPONSE_KEYWORD).await;
            return InteractionDecision::reject(NO_RESPONSE_KEYWORD);
        }

        if calculate_engagement_score(candidate) < self.config.min_engagement_score {
            return InteractionDecision::reject(LOW_ENGAGEMENT);
        }

        if self.roll_skip() {
            return InteractionDecision::reject(RANDOM_SKIP);
        }

        InteractionDecision::allow()
    }

    /// Gate generated text before posting it as a reply to `candidate`.
    ///
    /// Control directives stop the post (and `MUTE_THREAD` mutes the
    /// thread). Text that passes is still subject to `should_interact`.
    pub async fn should_interact_with_ai_output(
        &self,
        candidate: &Candidate,
        text: &str,
    ) -> InteractionDecision {
        let control = detect_control_response(text, &self.config.no_response_keywords);
        if control.should_post {
            return self.should_interact(candidate).await;
        }

        if control.control_type == Some(ControlType::MuteThread) {
            if let Some(thread_id) = candidate.thread_id() {
                let reason = control.reason.as_deref().unwrap_or(MODEL_REQUESTED_MUTE);
                self.mute_thread(thread_id, reason).await;
            }
        }

        debug!(
            candidate_id = %candidate.id,
            control = control.control_type.map(ControlType::as_str).unwrap_or_default(),
            "Generated output withheld"
        );
        InteractionDecision {
            interact: false,
            reason: control
                .reason
                .or_else(|| control.control_type.map(|c| c.as_str().to_string())),
        }
    }

    fn roll_skip(&self) -> bool {
        let probability = self.config.skip_probability.clamp(0.0, 1.0);
        if probability <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.next_f64() < probability
    }

    // ─── Mutations ──────────────────────────────────────────

    /// Permanently mute a thread. Idempotent; the reason is overwritten.
    pub async fn mute_thread(&self, thread_id: &str, reason: &str) {
        {
            let mut state = self.state.lock().await;
            let control = state.controls.entry(thread_id.to_string()).or_default();
            control.is_muted = true;
            control.mute_reason = Some(reason.to_string());
            control.last_interaction_time = Utc::now().timestamp_millis();
        }
        info!(thread_id = %thread_id, reason = %reason, "Muted thread");
        self.persist().await;
    }

    /// Record that a reply was posted in a thread. Returns the new depth.
    pub async fn process_interaction(&self, thread_id: &str) -> u32 {
        let depth = {
            let mut state = self.state.lock().await;
            let control = state.controls.entry(thread_id.to_string()).or_default();
            control.depth = control.depth.saturating_add(1);
            control.last_interaction_time = Utc::now().timestamp_millis();
            control.depth
        };
        debug!(thread_id = %thread_id, depth, "Recorded interaction");
        self.persist().await;
        depth
    }

    /// Remember a candidate as handled. In memory only until the next write.
    pub async fn mark_processed(&self, id: &str) {
        self.state.lock().await.processed.insert(id);
    }

    pub async fn is_processed(&self, id: &str) -> bool {
        self.state.lock().await.processed.contains(id)
    }

    pub async fn thread_control(&self, thread_id: &str) -> Option<ThreadControl> {
        self.state.lock().await.controls.get(thread_id).cloned()
    }

    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }

    /// Write the current state to the store.
    pub async fn flush(&self) {
        self.persist().await;
    }

    // ─── Cleanup ────────────────────────────────────────────

    pub async fn cleanup_controls(&self) -> CleanupReport {
        self.cleanup_controls_at(Utc::now()).await
    }

    /// Drop every thread idle for longer than `thread_timeout_ms`.
    pub async fn cleanup_controls_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let now_ms = now.timestamp_millis();
        let timeout = i64::try_from(self.config.thread_timeout_ms).unwrap_or(i64::MAX);

        let cleaned = {
            let mut state = self.state.lock().await;
            let before = state.controls.len();
            state
                .controls
                .retain(|_, control| now_ms.saturating_sub(control.last_interaction_time) <= timeout);
            before - state.controls.len()
        };

        if cleaned > 0 {
            info!(cleaned, "Cleaned up idle thread controls");
            self.persist().await;
        }
        CleanupReport {
            cleaned,
            timestamp: now,
        }
    }

    /// Scheduler job running `cleanup_controls` on `cleanup_schedule`.
    pub fn cleanup_job(self: &Arc<Self>) -> Job {
        let engine = Arc::clone(self);
        Job::new(
            format!("{}interaction_cleanup", self.config.plugin_prefix),
            self.config.cleanup_schedule.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    let report = engine.cleanup_controls().await;
                    Ok(serde_json::to_value(report)?)
                }
            },
        )
        .with_metadata("kind", json!("interaction_cleanup"))
    }

    // ─── Persistence ────────────────────────────────────────

    async fn snapshot(&self) -> ControlSnapshot {
        let state = self.state.lock().await;
        ControlSnapshot {
            controls: state.controls.clone(),
            processed_items: state.processed.to_vec(),
            updated_at: Some(Utc::now()),
            metadata: json!({
                "pluginPrefix": self.config.plugin_prefix,
                "threadCount": state.controls.len(),
                "processedCount": state.processed.len(),
            }),
        }
    }

    async fn persist(&self) {
        let snapshot = self.snapshot().await;
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.cache_key, "Failed to encode interaction snapshot: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.cache_key, value, None).await {
            warn!(key = %self.cache_key, "Failed to persist interaction controls: {e}");
        }
    }
}
