//! Reply pipeline: one pass of an automation plugin over a batch of candidates.
//!
//! For each candidate: gate, generate, gate the generated text, publish,
//! then record the interaction. Generation and publishing are external
//! collaborators behind traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use pulsebot_cron::Job;
use pulsebot_types::Candidate;

use crate::control::effective_text;
use crate::engine::InteractionControl;

/// Produces reply text for a candidate (the LLM loop).
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, candidate: &Candidate) -> anyhow::Result<String>;
}

/// Posts a reply on the platform.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish(&self, candidate: &Candidate, text: &str) -> anyhow::Result<()>;
}

/// Supplies the candidates for a scheduled cycle (search, mentions, timeline).
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<Candidate>>;
}

/// Counts for one pass over a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub considered: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ReplyPipeline {
    engine: Arc<InteractionControl>,
    generator: Arc<dyn ReplyGenerator>,
    publisher: Arc<dyn ReplyPublisher>,
}

impl ReplyPipeline {
    pub fn new(
        engine: Arc<InteractionControl>,
        generator: Arc<dyn ReplyGenerator>,
        publisher: Arc<dyn ReplyPublisher>,
    ) -> Self {
        Self {
            engine,
            generator,
            publisher,
        }
    }

    pub fn engine(&self) -> &Arc<InteractionControl> {
        &self.engine
    }

    /// Process a batch of candidates.
    ///
    /// Candidates the model declined to answer are marked processed.
    /// Candidates rejected by the base gate, or whose generation or
    /// publishing failed, are not, so a later cycle may pick them up.
    pub async fn run_cycle(&self, candidates: Vec<Candidate>) -> CycleReport {
        let mut report = CycleReport::default();

        for candidate in candidates {
            report.considered += 1;

            let decision = self.engine.should_interact(&candidate).await;
            if !decision.interact {
                report.skipped += 1;
                continue;
            }

            let output = match self.generator.generate(&candidate).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(candidate_id = %candidate.id, "Reply generation failed: {e:#}");
                    report.failed += 1;
                    continue;
                }
            };

            let decision = self
                .engine
                .should_interact_with_ai_output(&candidate, &output)
                .await;
            if !decision.interact {
                debug!(
                    candidate_id = %candidate.id,
                    reason = decision.reason.as_deref().unwrap_or_default(),
                    "Reply withheld"
                );
                self.engine.mark_processed(&candidate.id).await;
                report.skipped += 1;
                continue;
            }

            let text = effective_text(&output).unwrap_or(output);
            if let Err(e) = self.publisher.publish(&candidate, &text).await {
                warn!(candidate_id = %candidate.id, "Publishing reply failed: {e:#}");
                report.failed += 1;
                continue;
            }

            if let Some(thread_id) = candidate.thread_id() {
                self.engine.process_interaction(thread_id).await;
            }
            self.engine.mark_processed(&candidate.id).await;
            report.replied += 1;
        }

        self.engine.flush().await;
        info!(
            considered = report.considered,
            replied = report.replied,
            skipped = report.skipped,
            failed = report.failed,
            "Reply cycle finished"
        );
        report
    }

    /// Wrap a fetch-and-reply cycle as a scheduler job.
    pub fn into_job(
        self: Arc<Self>,
        id: impl Into<String>,
        schedule: impl Into<String>,
        source: Arc<dyn CandidateSource>,
    ) -> Job {
        Job::new(id, schedule, move || {
            let pipeline = Arc::clone(&self);
            let source = Arc::clone(&source);
            async move {
                let candidates = source.fetch().await?;
                let report = pipeline.run_cycle(candidates).await;
                Ok(serde_json::to_value(report)?)
            }
        })
        .with_metadata("kind", json!("reply_cycle"))
    }
}
