//! In-memory job queue for tests/dev. Contents are lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use quill_core::{BrandId, JobId};

use super::{JobQueue, LEASE_EXPIRED, check_lease, QueueError, QueueSettings, QueueStats};
use crate::job::{FailOutcome, Job, JobStatus, JobType};

/// Selection and leasing happen inside one write-lock section, so two
/// concurrent `dequeue` calls can never receive the same job.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
    settings: QueueSettings,
}

impl InMemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn arc(settings: QueueSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn leased_mut(jobs: &mut HashMap<JobId, Job>, id: JobId, lease_id: Uuid) -> Result<&mut Job, QueueError> {
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        check_lease(job, lease_id)?;
        Ok(job)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, brand_id: BrandId, job_type: JobType, payload: String) -> Result<Job, QueueError> {
        let job = Job::new(brand_id, job_type, payload);
        self.write().insert(job.id, job.clone());
        tracing::debug!(job_id = %job.id, brand_id = %job.brand_id, job_type = %job.job_type, "job enqueued");
        Ok(job)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.write();
        let now = Utc::now();

        for job in jobs.values_mut().filter(|j| j.lease_expired(now)) {
            let outcome = job.record_failure(LEASE_EXPIRED, true, &self.settings.retry, now);
            tracing::warn!(job_id = %job.id, brand_id = %job.brand_id, ?outcome, "reclaimed expired lease");
        }

        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.lease(now, self.settings.lease_timeout);
            job.clone()
        }))
    }

    async fn ack(&self, id: JobId, lease_id: Uuid) -> Result<(), QueueError> {
        let mut jobs = self.write();
        Self::leased_mut(&mut jobs, id, lease_id)?.complete(Utc::now());
        Ok(())
    }

    async fn fail(&self, id: JobId, lease_id: Uuid, reason: &str, retry: bool) -> Result<FailOutcome, QueueError> {
        let mut jobs = self.write();
        let job = Self::leased_mut(&mut jobs, id, lease_id)?;
        Ok(job.record_failure(reason, retry, &self.settings.retry, Utc::now()))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.read().get(&id).cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let jobs = self.read();
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for job in self.read().values() {
            stats.count(job.status);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::job::RetryPolicy;

    fn brand() -> BrandId {
        BrandId::parse("acme").unwrap()
    }

    fn lease(job: &Job) -> Uuid {
        job.lease_id.unwrap()
    }

    fn immediate() -> QueueSettings {
        QueueSettings {
            lease_timeout: Duration::from_secs(60),
            retry: RetryPolicy::immediate(),
        }
    }

    #[tokio::test]
    async fn dequeue_leases_oldest_first_and_ack_completes() {
        let queue = InMemoryJobQueue::new(immediate());
        let first = queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        let second = queue.enqueue(brand(), JobType::Sync, String::new()).await.unwrap();

        let leased = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(leased.id, first.id);
        assert_eq!(leased.status, JobStatus::Leased);
        assert!(leased.leased_until.is_some());

        queue.ack(leased.id, lease(&leased)).await.unwrap();
        assert_eq!(queue.get(first.id).await.unwrap().unwrap().status, JobStatus::Completed);

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second.id);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leased_job_is_not_handed_out_twice() {
        let queue = InMemoryJobQueue::new(immediate());
        queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_some());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_ceiling_makes_third_failure_permanent() {
        let queue = InMemoryJobQueue::new(immediate());
        let job = queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();

        for expected in 1..=2 {
            let leased = queue.dequeue().await.unwrap().unwrap();
            let outcome = queue.fail(leased.id, lease(&leased), "boom", true).await.unwrap();
            assert!(matches!(outcome, FailOutcome::Retrying { retries, .. } if retries == expected));
        }

        let leased = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(queue.fail(leased.id, lease(&leased), "boom", true).await.unwrap(), FailOutcome::Failed { retries: 3 });

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backoff_hides_job_until_available() {
        let queue = InMemoryJobQueue::new(QueueSettings {
            lease_timeout: Duration::from_secs(60),
            retry: RetryPolicy::new(Duration::from_secs(3600), Duration::from_secs(3600)),
        });
        queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        let leased = queue.dequeue().await.unwrap().unwrap();

        queue.fail(leased.id, lease(&leased), "transient", true).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn ack_or_fail_without_lease_is_rejected() {
        let queue = InMemoryJobQueue::new(immediate());
        let job = queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();

        let token = Uuid::now_v7();

        assert!(matches!(queue.ack(job.id, token).await, Err(QueueError::NotLeased(_))));
        assert!(matches!(queue.fail(job.id, token, "x", true).await, Err(QueueError::NotLeased(_))));
        assert!(matches!(queue.ack(JobId::new(), token).await, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_as_a_failure() {
        let queue = InMemoryJobQueue::new(QueueSettings {
            lease_timeout: Duration::from_millis(10),
            retry: RetryPolicy::immediate(),
        });
        let job = queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.retries, 1);
        assert_eq!(again.last_error.as_deref(), Some(LEASE_EXPIRED));
        queue.ack(again.id, lease(&again)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_holder_cannot_resolve_a_reclaimed_job() {
        let queue = InMemoryJobQueue::new(QueueSettings {
            lease_timeout: Duration::from_millis(10),
            retry: RetryPolicy::immediate(),
        });
        queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        let first = queue.dequeue().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.lease_id, first.lease_id);

        assert!(matches!(queue.ack(first.id, lease(&first)).await, Err(QueueError::LeaseLost(_))));
        assert!(matches!(
            queue.fail(first.id, lease(&first), "late", true).await,
            Err(QueueError::LeaseLost(_))
        ));

        let stored = queue.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Leased);
        assert_eq!(stored.retries, 1);

        queue.ack(second.id, lease(&second)).await.unwrap();
        assert_eq!(queue.get(first.id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dequeue_never_shares_a_lease() {
        let queue = InMemoryJobQueue::arc(immediate());
        for _ in 0..64 {
            queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = queue.dequeue().await.unwrap() {
                    got.push(job.id);
                    tokio::task::yield_now().await;
                }
                got
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id), "job {id} leased twice");
            }
        }
        assert_eq!(seen.len(), 64);
        assert_eq!(queue.stats().await.unwrap().leased, 64);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let queue = InMemoryJobQueue::new(immediate());
        queue.enqueue(brand(), JobType::Run, String::new()).await.unwrap();
        queue.enqueue(brand(), JobType::Plan, "3".into()).await.unwrap();
        let leased = queue.dequeue().await.unwrap().unwrap();
        queue.ack(leased.id, lease(&leased)).await.unwrap();

        assert_eq!(queue.list(None, 10).await.unwrap().len(), 2);
        let pending = queue.list(Some(JobStatus::Pending), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, "3");
    }
}
