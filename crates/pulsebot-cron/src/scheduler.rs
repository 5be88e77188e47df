//! Job scheduler: evaluates cron expressions on each heartbeat and runs due jobs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulsebot_config::{SchedulerConfig, SchedulerMode};
use pulsebot_storage::KvStore;
use pulsebot_types::{HeartbeatReport, JobConfigRecord, JobResult, JobStatus, JobSummary};

use crate::store::JobStateStore;
use crate::{Job, SchedulerError, expression};

/// Owns the registered jobs and runs them when due.
pub struct Scheduler {
    state: Arc<JobStateStore>,
    config: SchedulerConfig,
    tz: Tz,
    jobs: RwLock<Vec<Job>>,
    /// Job IDs claimed by a heartbeat in this process.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn KvStore>, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let tz = config.tz()?;
        Ok(Self {
            state: Arc::new(JobStateStore::new(store, config.cache_ttl_ms)),
            config,
            tz,
            jobs: RwLock::new(Vec::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn mode(&self) -> SchedulerMode {
        self.config.mode
    }

    /// Register a job, replacing any job already registered under the same ID.
    pub async fn register_job(&self, job: Job) -> Result<(), SchedulerError> {
        if job.id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job id must not be empty".into()));
        }
        expression::parse_schedule(&job.schedule)?;

        let record = JobConfigRecord {
            id: job.id.clone(),
            schedule: job.schedule.clone(),
            metadata: job.metadata.clone(),
            registered_at: Utc::now(),
        };

        {
            let mut jobs = self.jobs.write().await;
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => {
                    info!(job_id = %job.id, schedule = %job.schedule, "Replacing registered job");
                    *existing = job;
                }
                None => {
                    info!(job_id = %job.id, schedule = %job.schedule, "Registered job");
                    jobs.push(job);
                }
            }
        }

        if let Err(e) = self.state.save_config(&record).await {
            warn!(job_id = %record.id, "Failed to persist job config: {e}");
        }
        Ok(())
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobSummary> {
        self.jobs.read().await.iter().map(Job::summary).collect()
    }

    /// Persisted run history for a job.
    pub async fn get_job_status(&self, job_id: &str) -> JobStatus {
        self.state.status(job_id).await
    }

    /// Heartbeat signal: evaluate and run due jobs now.
    pub async fn trigger_heartbeat(&self) -> HeartbeatReport {
        debug!("Heartbeat");
        self.process_jobs().await
    }

    pub async fn process_jobs(&self) -> HeartbeatReport {
        self.process_jobs_at(Utc::now()).await
    }

    /// Run every job that is due at `now`.
    ///
    /// Due jobs run concurrently, each on its own task. A failing or
    /// panicking handler becomes an error result and does not affect the
    /// others. Success advances `lastRun`; failure only records `lastError`.
    /// A job's outcome is recorded by its task, so it still lands if the
    /// caller stops waiting for the report.
    pub async fn process_jobs_at(&self, now: DateTime<Utc>) -> HeartbeatReport {
        let jobs = self.jobs.read().await.clone();
        let claims = join_all(jobs.iter().map(|job| self.claim_if_due(job, now))).await;

        let handles: Vec<(String, JoinHandle<JobResult>)> = jobs
            .into_iter()
            .zip(claims)
            .filter_map(|(job, claim)| claim.map(|claim| (job, claim)))
            .map(|(job, claim)| {
                info!(job_id = %job.id, "Executing job");
                let job_id = job.id.clone();
                let task = run_job(job, claim, Arc::clone(&self.state), now);
                (job_id, tokio::spawn(task))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (job_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => JobResult::error(&job_id, now, join_error_message(e)),
            };
            results.push(result);
        }

        HeartbeatReport {
            timestamp: now,
            results,
        }
    }

    /// Start heartbeats according to the configured mode.
    ///
    /// Single-node: one heartbeat immediately, then one every
    /// `heartbeat_interval_ms` until `cancel` fires. Serverless: no timer,
    /// heartbeats must be triggered externally.
    pub fn initialize(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        match self.config.mode {
            SchedulerMode::Serverless => {
                info!("Scheduler in serverless mode, waiting for external heartbeats");
                None
            }
            SchedulerMode::SingleNode => {
                let scheduler = Arc::clone(self);
                let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
                info!(interval_ms = period.as_millis() as u64, "Scheduler started");
                Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                info!("Scheduler stopped");
                                break;
                            }
                            _ = ticker.tick() => {
                                let report = scheduler.trigger_heartbeat().await;
                                if !report.results.is_empty() {
                                    debug!(ran = report.results.len(), "Heartbeat finished");
                                }
                            }
                        }
                    }
                }))
            }
        }
    }

    /// Claim the job, then check whether it is due. The check runs under
    /// the claim, so it observes the `lastRun` of any invocation that held
    /// the claim before.
    async fn claim_if_due(&self, job: &Job, now: DateTime<Utc>) -> Option<Claim> {
        let Some(claim) = Claim::acquire(&self.in_flight, &job.id) else {
            debug!(job_id = %job.id, "Job claimed by another heartbeat, skipping");
            return None;
        };
        self.is_job_due(job, now).await.then_some(claim)
    }

    async fn is_job_due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let last_run = match self.state.last_run(&job.id).await {
            Ok(last_run) => last_run,
            Err(e) => {
                warn!(job_id = %job.id, "Failed to read lastRun, skipping this tick: {e}");
                return false;
            }
        };
        match expression::is_due(&job.schedule, last_run, now, self.tz) {
            Ok(due) => {
                if !due {
                    debug!(job_id = %job.id, "Job not due");
                }
                due
            }
            Err(e) => {
                warn!(job_id = %job.id, "Failed to evaluate schedule: {e}");
                false
            }
        }
    }
}

/// Marks a job as in flight in this process until dropped.
struct Claim {
    in_flight: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Claim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Option<Self> {
        let claimed = in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string());
        claimed.then(|| Self {
            in_flight: Arc::clone(in_flight),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Run a claimed job and record its outcome. The claim is released only
/// after the outcome is persisted.
async fn run_job(
    job: Job,
    claim: Claim,
    state: Arc<JobStateStore>,
    now: DateTime<Utc>,
) -> JobResult {
    let result = match tokio::spawn((job.handler)()).await {
        Ok(Ok(value)) => JobResult::success(&job.id, now, value),
        Ok(Err(e)) => JobResult::error(&job.id, now, format!("{e:#}")),
        Err(e) => JobResult::error(&job.id, now, join_error_message(e)),
    };
    record(&state, &result, now).await;
    drop(claim);
    result
}

async fn record(state: &JobStateStore, result: &JobResult, now: DateTime<Utc>) {
    let persisted = if result.is_success() {
        debug!(job_id = %result.job_id, "Job succeeded");
        state.record_success(result, now).await
    } else {
        warn!(
            job_id = %result.job_id,
            error = result.error.as_deref().unwrap_or_default(),
            "Job failed"
        );
        state.record_failure(result).await
    };
    if let Err(e) = persisted {
        warn!(job_id = %result.job_id, "Failed to persist job result: {e}");
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("job task failed: {err}");
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("job panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("job panicked: {msg}")
    } else {
        "job panicked".to_string()
    }
}
