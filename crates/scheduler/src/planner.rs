//! Recurring job planner.
//!
//! On each tick, for every brand in the store:
//!
//! - a `run` job once `schedule_interval_hours` have passed since the last one
//!   this planner enqueued (the first tick enqueues immediately)
//! - a `sync` job on the same rule with a daily period
//! - a `publish` job for every calendar entry that is scheduled and due,
//!   at most once per entry for the planner's lifetime

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use quill_core::{BrandId, BrandProfile, PostId};
use quill_memory::{BrandStore, StoreError};

use crate::job::{JobType, after};
use crate::queue::{JobQueue, QueueError};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// How often brands are examined.
    pub interval: Duration,
    /// Period of the per-brand `sync` job.
    pub sync_period: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            sync_period: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Jobs enqueued by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub run: usize,
    pub sync: usize,
    pub publish: usize,
}

impl PlanReport {
    pub fn total(&self) -> usize {
        self.run + self.sync + self.publish
    }
}

#[derive(Debug, Default)]
struct PlannerState {
    last_run: HashMap<BrandId, DateTime<Utc>>,
    last_sync: HashMap<BrandId, DateTime<Utc>>,
    published: HashSet<(BrandId, PostId)>,
}

pub struct JobPlanner {
    store: Arc<dyn BrandStore>,
    queue: Arc<dyn JobQueue>,
    config: PlannerConfig,
    state: Mutex<PlannerState>,
}

impl JobPlanner {
    pub fn new(store: Arc<dyn BrandStore>, queue: Arc<dyn JobQueue>, config: PlannerConfig) -> Self {
        Self {
            store,
            queue,
            config,
            state: Mutex::new(PlannerState::default()),
        }
    }

    pub async fn tick(&self) -> Result<PlanReport, PlannerError> {
        self.tick_at(Utc::now()).await
    }

    /// Plan as if the current instant were `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<PlanReport, PlannerError> {
        let brands = self.store.list_brands().await?;
        let mut state = self.state.lock().await;
        let mut report = PlanReport::default();

        for brand in &brands {
            if is_elapsed(state.last_run.get(&brand.id), run_period(brand), now) {
                self.queue.enqueue(brand.id.clone(), JobType::Run, String::new()).await?;
                state.last_run.insert(brand.id.clone(), now);
                report.run += 1;
            }

            if is_elapsed(state.last_sync.get(&brand.id), self.config.sync_period, now) {
                self.queue.enqueue(brand.id.clone(), JobType::Sync, String::new()).await?;
                state.last_sync.insert(brand.id.clone(), now);
                report.sync += 1;
            }

            let due = match self.store.due_scheduled_posts(&brand.id, now).await {
                Ok(due) => due,
                Err(err) => {
                    tracing::warn!(brand_id = %brand.id, error = %err, "failed to read calendar");
                    continue;
                }
            };
            for entry in due {
                let key = (brand.id.clone(), entry.id.clone());
                if state.published.contains(&key) {
                    continue;
                }
                self.queue
                    .enqueue(brand.id.clone(), JobType::Publish, entry.id.to_string())
                    .await?;
                state.published.insert(key);
                report.publish += 1;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                brands = brands.len(),
                run = report.run,
                sync = report.sync,
                publish = report.publish,
                "planned jobs"
            );
        }
        Ok(report)
    }

    /// Start planning on the current tokio runtime.
    pub fn spawn(self) -> PlannerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::info!("planner received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = self.tick().await {
                            tracing::warn!(error = %err, "planner tick failed");
                        }
                    }
                }
            }
        });

        PlannerHandle { shutdown, join }
    }
}

impl std::fmt::Debug for JobPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPlanner").field("config", &self.config).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct PlannerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl PlannerHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "planner task ended abnormally");
        }
    }
}

fn run_period(brand: &BrandProfile) -> Duration {
    Duration::from_secs(u64::from(brand.schedule_interval_hours.max(1)) * 60 * 60)
}

fn is_elapsed(last: Option<&DateTime<Utc>>, period: Duration, now: DateTime<Utc>) -> bool {
    last.is_none_or(|last| after(*last, period) <= now)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use quill_core::{PostStatus, ScheduledPost};
    use quill_memory::InMemoryBrandStore;

    use super::*;
    use crate::job::JobStatus;
    use crate::queue::InMemoryJobQueue;

    fn brand(id: &str, hours: u32) -> BrandProfile {
        let mut brand = BrandProfile::new(BrandId::parse(id).unwrap(), id).with_topics(["AI"]);
        brand.schedule_interval_hours = hours;
        brand
    }

    fn entry(brand_id: &BrandId, id: &str, status: PostStatus, scheduled_at: DateTime<Utc>) -> ScheduledPost {
        ScheduledPost {
            id: PostId::parse(id).unwrap(),
            brand_id: brand_id.clone(),
            topic: "AI".into(),
            content: "draft".into(),
            platform: "linkedin".into(),
            status,
            scheduled_at,
            created_at: scheduled_at,
            updated_at: scheduled_at,
        }
    }

    fn planner(store: Arc<InMemoryBrandStore>) -> (JobPlanner, Arc<InMemoryJobQueue>) {
        let queue = InMemoryJobQueue::arc(Default::default());
        let planner = JobPlanner::new(store, queue.clone(), PlannerConfig::default());
        (planner, queue)
    }

    #[tokio::test]
    async fn first_tick_enqueues_run_and_sync_per_brand() {
        let store = Arc::new(InMemoryBrandStore::with_brands([brand("acme", 6), brand("globex", 12)]));
        let (planner, queue) = planner(store);
        let now = Utc::now();

        let report = planner.tick_at(now).await.unwrap();
        assert_eq!(report, PlanReport { run: 2, sync: 2, publish: 0 });
        assert_eq!(queue.stats().await.unwrap().pending, 4);

        assert_eq!(planner.tick_at(now + TimeDelta::minutes(5)).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn run_follows_each_brand_interval_and_sync_is_daily() {
        let store = Arc::new(InMemoryBrandStore::with_brands([brand("acme", 6), brand("globex", 12)]));
        let (planner, _queue) = planner(store);
        let start = Utc::now();
        planner.tick_at(start).await.unwrap();

        let report = planner.tick_at(start + TimeDelta::hours(6)).await.unwrap();
        assert_eq!(report, PlanReport { run: 1, sync: 0, publish: 0 });

        let report = planner.tick_at(start + TimeDelta::hours(12)).await.unwrap();
        assert_eq!(report, PlanReport { run: 2, sync: 0, publish: 0 });

        let report = planner.tick_at(start + TimeDelta::hours(24)).await.unwrap();
        assert_eq!(report, PlanReport { run: 2, sync: 2, publish: 0 });
    }

    #[tokio::test]
    async fn due_scheduled_posts_are_enqueued_once() {
        let acme = brand("acme", 24);
        let store = Arc::new(InMemoryBrandStore::with_brands([acme.clone()]));
        let now = Utc::now();
        store
            .save_scheduled_post(&entry(&acme.id, "due", PostStatus::Scheduled, now - TimeDelta::minutes(1)))
            .await
            .unwrap();
        store
            .save_scheduled_post(&entry(&acme.id, "later", PostStatus::Scheduled, now + TimeDelta::hours(2)))
            .await
            .unwrap();
        store
            .save_scheduled_post(&entry(&acme.id, "review", PostStatus::PendingReview, now))
            .await
            .unwrap();
        let (planner, queue) = planner(store);

        assert_eq!(planner.tick_at(now).await.unwrap().publish, 1);
        assert_eq!(planner.tick_at(now + TimeDelta::minutes(1)).await.unwrap().publish, 0);
        assert_eq!(planner.tick_at(now + TimeDelta::hours(3)).await.unwrap().publish, 1);

        let publishes: Vec<String> = queue
            .list(Some(JobStatus::Pending), 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|j| j.job_type == JobType::Publish)
            .map(|j| j.payload)
            .collect();
        assert_eq!(publishes, vec!["due".to_string(), "later".to_string()]);
    }

    #[tokio::test]
    async fn empty_store_plans_nothing() {
        let (planner, queue) = planner(Arc::new(InMemoryBrandStore::new()));
        assert_eq!(planner.tick().await.unwrap(), PlanReport::default());
        assert_eq!(queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn spawned_planner_enqueues_and_stops() {
        let store = Arc::new(InMemoryBrandStore::with_brands([brand("acme", 24)]));
        let queue = InMemoryJobQueue::arc(Default::default());
        let planner = JobPlanner::new(
            store,
            queue.clone(),
            PlannerConfig {
                interval: Duration::from_millis(10),
                ..PlannerConfig::default()
            },
        );

        let handle = planner.spawn();
        for _ in 0..100 {
            if queue.stats().await.unwrap().pending == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(queue.stats().await.unwrap().pending, 2);
    }
}
