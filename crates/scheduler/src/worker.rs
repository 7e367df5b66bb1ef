//! Polling worker: lease a job, resolve its brand, dispatch, resolve the job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use quill_agent::{AgentError, AgentFactory, BrandAgent};
use quill_observability::ActivityLog;

use crate::job::{FailOutcome, Job, JobType};
use crate::queue::{JobQueue, QueueError};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// How often to poll the queue
    pub poll_interval: Duration,
    /// Drafts per `plan` job when the payload does not say otherwise
    pub plan_batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "quill-worker".to_string(),
            poll_interval: Duration::from_secs(5),
            plan_batch_size: 5,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Why a job's action did not complete.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("scheduled post {0} not found")]
    ScheduledPostNotFound(String),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::UnknownJobType(_))
    }
}

/// How the worker resolved a leased job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Acked,
    Retrying {
        retries: u32,
        available_at: DateTime<Utc>,
    },
    Failed {
        retries: u32,
        reason: String,
    },
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub queue_errors: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop polling and wait for the loop to exit. A job already in progress
    /// runs to completion first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats)
    }
}

/// Pulls one job per tick from a shared queue and runs it against the brand's
/// agent. Several workers may share one queue.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    factory: Arc<dyn AgentFactory>,
    activity: Arc<dyn ActivityLog>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        factory: Arc<dyn AgentFactory>,
        activity: Arc<dyn ActivityLog>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            factory,
            activity,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats)
    }

    /// Poll once: lease at most one job and process it.
    ///
    /// Returns `None` when nothing was ready.
    pub async fn tick(&self) -> Result<Option<JobOutcome>, QueueError> {
        self.update_stats(|s| s.ticks += 1);

        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.update_stats(|s| s.queue_errors += 1);
                return Err(err);
            }
        };

        self.process(&job).await.map(Some)
    }

    /// Run a leased job to its outcome and report it to the queue.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, QueueError> {
        let Some(lease_id) = job.lease_id else {
            self.update_stats(|s| s.queue_errors += 1);
            return Err(QueueError::NotLeased(job.id));
        };

        tracing::info!(
            worker = %self.config.name,
            job_id = %job.id,
            brand_id = %job.brand_id,
            job_type = %job.job_type,
            retries = job.retries,
            "processing job"
        );

        let agent = match self.factory.resolve(&job.brand_id).await {
            Ok(agent) => agent,
            Err(err) => {
                let reason = err.to_string();
                self.activity
                    .error(format!("job {} ({}): cannot resolve brand: {reason}", job.id, job.job_type));
                return self.resolve_failure(job, lease_id, &reason, false).await;
            }
        };

        match self.dispatch(agent.as_ref(), job).await {
            Ok(()) => {
                if let Err(err) = self.queue.ack(job.id, lease_id).await {
                    self.update_stats(|s| s.queue_errors += 1);
                    return Err(err);
                }
                self.update_stats(|s| {
                    s.jobs_processed += 1;
                    s.jobs_succeeded += 1;
                });
                tracing::info!(job_id = %job.id, brand_id = %job.brand_id, job_type = %job.job_type, "job completed");
                self.activity
                    .info(format!("job {} ({}) for {} completed", job.id, job.job_type, job.brand_id));
                Ok(JobOutcome::Acked)
            }
            Err(err) => {
                let reason = err.to_string();
                self.activity
                    .warn(format!("job {} ({}) for {} failed: {reason}", job.id, job.job_type, job.brand_id));
                self.resolve_failure(job, lease_id, &reason, err.is_retryable()).await
            }
        }
    }

    async fn dispatch(&self, agent: &dyn BrandAgent, job: &Job) -> Result<(), DispatchError> {
        match &job.job_type {
            JobType::Run => {
                agent.run().await?;
            }
            JobType::Sync => {
                let report = agent.sync_analytics().await?;
                tracing::debug!(job_id = %job.id, updated = report.updated, failed = report.failed, "analytics synced");
            }
            JobType::Plan => {
                let planned = agent.plan_batch(self.plan_count(&job.payload)).await?;
                tracing::debug!(job_id = %job.id, planned = planned.len(), "calendar planned");
            }
            JobType::Publish => {
                let wanted = job.payload.trim();
                let scheduled = agent.scheduled_posts().await?;
                let entry = scheduled
                    .iter()
                    .find(|p| p.id.as_str() == wanted)
                    .ok_or_else(|| DispatchError::ScheduledPostNotFound(wanted.to_string()))?;
                agent.publish_scheduled_post(entry).await?;
            }
            JobType::Unknown(other) => return Err(DispatchError::UnknownJobType(other.clone())),
        }
        Ok(())
    }

    /// A positive integer payload overrides the configured batch size.
    fn plan_count(&self, payload: &str) -> usize {
        payload
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(self.config.plan_batch_size)
    }

    async fn resolve_failure(
        &self,
        job: &Job,
        lease_id: Uuid,
        reason: &str,
        retry: bool,
    ) -> Result<JobOutcome, QueueError> {
        let outcome = match self.queue.fail(job.id, lease_id, reason, retry).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.update_stats(|s| s.queue_errors += 1);
                return Err(err);
            }
        };

        match outcome {
            FailOutcome::Retrying { retries, available_at } => {
                self.update_stats(|s| {
                    s.jobs_processed += 1;
                    s.jobs_retried += 1;
                });
                tracing::warn!(
                    job_id = %job.id,
                    brand_id = %job.brand_id,
                    retries,
                    %available_at,
                    error = %reason,
                    "job failed, will retry"
                );
                Ok(JobOutcome::Retrying { retries, available_at })
            }
            FailOutcome::Failed { retries } => {
                self.update_stats(|s| {
                    s.jobs_processed += 1;
                    s.jobs_failed += 1;
                });
                tracing::error!(
                    job_id = %job.id,
                    brand_id = %job.brand_id,
                    retries,
                    error = %reason,
                    "job permanently failed"
                );
                self.activity
                    .error(format!("job {} ({}) for {} gave up: {reason}", job.id, job.job_type, job.brand_id));
                Ok(JobOutcome::Failed {
                    retries,
                    reason: reason.to_string(),
                })
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut WorkerStats)) {
        let mut guard = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    /// Start the polling loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let stats = Arc::clone(&self.stats);
        let signal = Arc::clone(&shutdown);

        let join = tokio::spawn(async move {
            tracing::info!(worker = %self.config.name, poll_interval = ?self.config.poll_interval, "worker started");

            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::info!(worker = %self.config.name, "worker received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = self.tick().await {
                            tracing::warn!(worker = %self.config.name, error = %err, "queue error during poll");
                        }
                    }
                }
            }

            tracing::info!(worker = %self.config.name, "worker stopped");
        });

        WorkerHandle { shutdown, join, stats }
    }
}

fn snapshot(stats: &Mutex<WorkerStats>) -> WorkerStats {
    match stats.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("config", &self.config).finish_non_exhaustive()
    }
}
