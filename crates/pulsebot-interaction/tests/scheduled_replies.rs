//! Scheduler, interaction engine and reply pipeline working together over a
//! shared store, including a simulated process restart.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use pulsebot_config::{InteractionConfig, SchedulerConfig, SchedulerMode};
use pulsebot_cron::Scheduler;
use pulsebot_interaction::{
    CandidateSource, InteractionControl, ReplyGenerator, ReplyPipeline, ReplyPublisher,
};
use pulsebot_storage::{KvStore, SqliteKvStore};
use pulsebot_types::Candidate;

struct Mentions(Vec<Candidate>);

#[async_trait]
impl CandidateSource for Mentions {
    async fn fetch(&self) -> anyhow::Result<Vec<Candidate>> {
        Ok(self.0.clone())
    }
}

/// Mutes threads that mention "politics", answers everything else.
struct CautiousModel;

#[async_trait]
impl ReplyGenerator for CautiousModel {
    async fn generate(&self, candidate: &Candidate) -> anyhow::Result<String> {
        if candidate.text.contains("politics") {
            Ok("MUTE_THREAD".to_string())
        } else {
            Ok(format!("{{\"content\":\"re: {}\"}}", candidate.text))
        }
    }
}

#[derive(Default)]
struct Timeline {
    posts: Mutex<Vec<String>>,
}

#[async_trait]
impl ReplyPublisher for Timeline {
    async fn publish(&self, _candidate: &Candidate, text: &str) -> anyhow::Result<()> {
        self.posts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn mention(id: &str, thread: &str, text: &str, likes: u64) -> Candidate {
    Candidate {
        conversation_id: Some(thread.to_string()),
        likes: Some(likes),
        ..Candidate::new(id, text)
    }
}

fn interaction_config() -> InteractionConfig {
    InteractionConfig {
        plugin_prefix: "twitter:".into(),
        max_thread_depth: 3,
        min_engagement_score: 0.5,
        cleanup_schedule: "0 * * * *".into(),
        ..Default::default()
    }
}

fn serverless() -> SchedulerConfig {
    SchedulerConfig {
        mode: SchedulerMode::Serverless,
        ..Default::default()
    }
}

fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

async fn boot(
    kv: Arc<dyn KvStore>,
    timeline: Arc<Timeline>,
    candidates: Vec<Candidate>,
) -> (Arc<Scheduler>, Arc<InteractionControl>) {
    let scheduler = Arc::new(Scheduler::new(kv.clone(), serverless()).unwrap());
    let engine = Arc::new(InteractionControl::initialize(kv, interaction_config()).await);

    let pipeline = Arc::new(ReplyPipeline::new(
        engine.clone(),
        Arc::new(CautiousModel),
        timeline,
    ));
    scheduler
        .register_job(pipeline.into_job(
            "twitter:mentions",
            "*/10 * * * *",
            Arc::new(Mentions(candidates)),
        ))
        .await
        .unwrap();
    scheduler.register_job(engine.cleanup_job()).await.unwrap();
    (scheduler, engine)
}

#[tokio::test]
async fn test_heartbeats_drive_gated_replies() {
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open_in_memory().unwrap());
    let timeline = Arc::new(Timeline::default());
    let candidates = vec![
        mention("1", "t1", "love the new release", 200),
        mention("2", "t2", "thoughts on politics?", 500),
        mention("3", "t3", "meh", 1),
    ];
    let (scheduler, engine) = boot(kv.clone(), timeline.clone(), candidates).await;

    let t0 = at("2024-03-01T12:00:00Z");
    let report = scheduler.process_jobs_at(t0).await;
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.is_success()));

    let mentions = report
        .results
        .iter()
        .find(|r| r.job_id == "twitter:mentions")
        .unwrap();
    let cycle = mentions.result.as_ref().unwrap();
    assert_eq!(cycle["considered"], 3);
    assert_eq!(cycle["replied"], 1);
    assert_eq!(cycle["skipped"], 2);

    assert_eq!(
        timeline.posts.lock().unwrap().clone(),
        vec!["re: love the new release".to_string()]
    );
    assert_eq!(engine.thread_control("t1").await.unwrap().depth, 1);
    assert!(engine.thread_control("t2").await.unwrap().is_muted);
    assert!(engine.thread_control("t3").await.is_none());

    // One minute later nothing is due.
    let report = scheduler.process_jobs_at(t0 + Duration::seconds(60)).await;
    assert!(report.results.is_empty());

    // Next slot: the same mentions come back but are deduplicated or muted.
    let report = scheduler.process_jobs_at(t0 + Duration::minutes(10)).await;
    assert_eq!(report.results.len(), 1);
    let cycle = report.results[0].result.as_ref().unwrap();
    assert_eq!(cycle["replied"], 0);
    assert_eq!(timeline.posts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulsebot.db");
    let t0 = at("2024-03-01T12:00:00Z");

    {
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(&path).unwrap());
        let timeline = Arc::new(Timeline::default());
        let candidates = vec![
            mention("1", "t1", "love the new release", 200),
            mention("2", "t2", "thoughts on politics?", 500),
        ];
        let (scheduler, _) = boot(kv, timeline.clone(), candidates).await;
        scheduler.process_jobs_at(t0).await;
        assert_eq!(timeline.posts.lock().unwrap().len(), 1);
    }

    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(&path).unwrap());
    let timeline = Arc::new(Timeline::default());
    let candidates = vec![
        mention("1", "t1", "love the new release", 200),
        mention("4", "t2", "more politics", 900),
        mention("5", "t5", "first time here", 300),
    ];
    let (scheduler, engine) = boot(kv, timeline.clone(), candidates).await;

    // Run history came back from the store: the job is not due again yet.
    let status = scheduler.get_job_status("twitter:mentions").await;
    assert_eq!(status.last_run, Some(t0));
    let report = scheduler.process_jobs_at(t0 + Duration::minutes(5)).await;
    assert!(report.results.is_empty());

    // Dedup set and mutes came back too.
    assert!(engine.is_processed("1").await);
    assert!(engine.thread_control("t2").await.unwrap().is_muted);

    let report = scheduler.process_jobs_at(t0 + Duration::minutes(10)).await;
    assert_eq!(report.results.len(), 1);
    assert_eq!(
        timeline.posts.lock().unwrap().clone(),
        vec!["re: first time here".to_string()]
    );
}

#[tokio::test]
async fn test_cleanup_job_forgets_idle_threads() {
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open_in_memory().unwrap());
    let config = InteractionConfig {
        thread_timeout_ms: 0,
        ..interaction_config()
    };
    let engine = Arc::new(InteractionControl::initialize(kv.clone(), config).await);
    engine.process_interaction("t1").await;

    let scheduler = Scheduler::new(kv, serverless()).unwrap();
    scheduler.register_job(engine.cleanup_job()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let report = scheduler.process_jobs().await;
    assert_eq!(report.results[0].result.as_ref().unwrap()["cleaned"], 1);
    assert!(engine.thread_control("t1").await.is_none());
}
