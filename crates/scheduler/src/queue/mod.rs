//! Job queue abstraction and backends.
//!
//! ## Lease guarantee
//!
//! `dequeue` hands a job to exactly one caller together with a fresh
//! `lease_id`. The job stays leased until the holder calls `ack` or `fail` with
//! that token, or until the lease expires. An expired lease is reclaimed by the
//! next `dequeue` and counts as one failed attempt (`lease expired`) toward the
//! retry ceiling. Once reclaimed, the old token is rejected with
//! [`QueueError::LeaseLost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use quill_core::{BrandId, JobId};

use crate::job::{FailOutcome, Job, JobStatus, JobType, RetryPolicy};

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryJobQueue;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobQueue;

/// Reason recorded when a lease runs out before `ack`/`fail`.
pub const LEASE_EXPIRED: &str = "lease expired";

/// Job queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is not leased")]
    NotLeased(JobId),
    #[error("lease on job {0} is held by another worker")]
    LeaseLost(JobId),
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Behaviour shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a worker may hold a job before it is reclaimed.
    pub lease_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub leased: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub(crate) fn count(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    pub(crate) fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Leased => self.leased += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
    }
}

/// The job must still be leased under `lease_id`.
pub(crate) fn check_lease(job: &Job, lease_id: Uuid) -> Result<(), QueueError> {
    if job.status != JobStatus::Leased {
        return Err(QueueError::NotLeased(job.id));
    }
    if job.lease_id != Some(lease_id) {
        return Err(QueueError::LeaseLost(job.id));
    }
    Ok(())
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a pending job; the queue assigns its id.
    async fn enqueue(&self, brand_id: BrandId, job_type: JobType, payload: String) -> Result<Job, QueueError>;

    /// Lease the oldest ready job, if any.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Mark a leased job completed.
    async fn ack(&self, id: JobId, lease_id: Uuid) -> Result<(), QueueError>;

    /// Record a failed attempt on a leased job.
    ///
    /// With `retry = true` the job is re-queued after a backoff unless this
    /// failure reaches the retry ceiling; otherwise it fails permanently.
    async fn fail(&self, id: JobId, lease_id: Uuid, reason: &str, retry: bool) -> Result<FailOutcome, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Jobs oldest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueue for Arc<Q> {
    async fn enqueue(&self, brand_id: BrandId, job_type: JobType, payload: String) -> Result<Job, QueueError> {
        (**self).enqueue(brand_id, job_type, payload).await
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        (**self).dequeue().await
    }

    async fn ack(&self, id: JobId, lease_id: Uuid) -> Result<(), QueueError> {
        (**self).ack(id, lease_id).await
    }

    async fn fail(&self, id: JobId, lease_id: Uuid, reason: &str, retry: bool) -> Result<FailOutcome, QueueError> {
        (**self).fail(id, lease_id, reason, retry).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        (**self).get(id).await
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, QueueError> {
        (**self).list(status, limit).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}
