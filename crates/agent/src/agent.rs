//! Per-brand content agent.
//!
//! ## Actions
//!
//! - **run**: research, generate, reject near-duplicates, publish, remember
//! - **sync**: refresh engagement counters of published posts
//! - **plan**: draft a batch of calendar entries for review
//! - **publish**: push one approved calendar entry out
//!
//! Every action is scoped to the brand the agent was built for; the agent
//! never reads or writes another brand's records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use quill_core::{BrandProfile, Post, PostId, PostStatus, ScheduledPost, Trend};
use quill_memory::{BrandStore, VectorIndex, VectorRecord};
use quill_observability::ActivityLog;

use crate::error::AgentError;
use crate::prompt;
use crate::providers::Providers;

/// Tunables shared by all agents.
#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    /// Similarity at or above which a draft counts as a repeat of past content.
    pub duplicate_threshold: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.92,
        }
    }
}

/// Outcome of an analytics sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub updated: usize,
    pub failed: usize,
}

/// The actions a job can ask of a brand.
#[async_trait]
pub trait BrandAgent: Send + Sync {
    fn brand(&self) -> &BrandProfile;

    async fn run(&self) -> Result<Post, AgentError>;

    async fn sync_analytics(&self) -> Result<SyncReport, AgentError>;

    async fn plan_batch(&self, count: usize) -> Result<Vec<ScheduledPost>, AgentError>;

    async fn scheduled_posts(&self) -> Result<Vec<ScheduledPost>, AgentError>;

    async fn publish_scheduled_post(&self, scheduled: &ScheduledPost) -> Result<Post, AgentError>;
}

pub struct ContentAgent {
    brand: BrandProfile,
    store: Arc<dyn BrandStore>,
    index: Arc<VectorIndex>,
    providers: Providers,
    activity: Arc<dyn ActivityLog>,
    settings: AgentSettings,
}

impl std::fmt::Debug for ContentAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentAgent")
            .field("brand_id", &self.brand.id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContentAgent {
    pub fn new(
        brand: BrandProfile,
        store: Arc<dyn BrandStore>,
        index: Arc<VectorIndex>,
        providers: Providers,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            brand,
            store,
            index,
            providers,
            activity,
            settings: AgentSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    fn topic_at(&self, offset: usize) -> Result<&str, AgentError> {
        let topics: Vec<&str> = self
            .brand
            .topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(AgentError::NoTopics(self.brand.id.clone()));
        }
        Ok(topics[offset % topics.len()])
    }

    async fn research(&self, topic: &str) -> Result<Vec<Trend>, AgentError> {
        let trends = self.providers.search.search(topic).await?;
        let total = trends.len();
        let kept: Vec<Trend> = trends
            .into_iter()
            .filter(|t| {
                !self.brand.mentions_anti_topic(&t.title) && !self.brand.mentions_anti_topic(&t.snippet)
            })
            .collect();
        if kept.len() < total {
            tracing::debug!(brand_id = %self.brand.id, dropped = total - kept.len(), "filtered trends matching anti-topics");
        }
        Ok(kept)
    }

    async fn draft(&self, topic: &str, trends: &[Trend], avoid: Option<&str>) -> Result<String, AgentError> {
        let system = prompt::system_prompt(&self.brand);
        let user = prompt::post_prompt(topic, trends, avoid);
        let content = self.providers.llm.generate(&system, &user).await?;
        Ok(content.trim().to_string())
    }

    /// Id and score of the closest stored embedding, if it crosses the threshold.
    fn nearest_duplicate(&self, embedding: &[f32]) -> Option<(String, f32)> {
        self.index
            .query(embedding, 1)
            .into_iter()
            .next()
            .filter(|hit| hit.score >= self.settings.duplicate_threshold)
            .map(|hit| (hit.id, hit.score))
    }

    fn remember(&self, post: &Post, embedding: Vec<f32>) -> Result<(), AgentError> {
        let record = VectorRecord::new(post.id.as_str(), embedding)
            .with_metadata("topic", post.topic.clone())
            .with_metadata("platform", post.platform.clone())
            .with_metadata("created_at", post.created_at.to_rfc3339());
        self.index.add(record)?;
        Ok(())
    }

    /// Published posts so far; failed attempts do not advance topic rotation.
    async fn published_count(&self) -> Result<usize, AgentError> {
        let history = self.store.history(&self.brand.id).await?;
        Ok(history.iter().filter(|p| p.is_published()).count())
    }

    /// Save and index a post that is already live. Failures are logged, not
    /// returned, so a retried job never publishes the same post twice.
    async fn record_live(&self, post: &Post, embedding: Option<Vec<f32>>) {
        if let Err(err) = self.store.save_post(post).await {
            tracing::error!(brand_id = %self.brand.id, post_id = %post.id, error = %err, "failed to save published post");
            self.activity.error(format!(
                "{}: post {} is live but was not saved: {err}",
                self.brand.name, post.id
            ));
        }

        let embedding = match embedding {
            Some(embedding) => embedding,
            None => match self.providers.embedding.embed(&post.content).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    tracing::warn!(brand_id = %self.brand.id, post_id = %post.id, error = %err, "failed to embed published post");
                    return;
                }
            },
        };
        if let Err(err) = self.remember(post, embedding) {
            tracing::warn!(brand_id = %self.brand.id, post_id = %post.id, error = %err, "failed to index published post");
        }
    }

    async fn publish(&self, post: &mut Post) -> Result<(), AgentError> {
        let receipt = self.providers.social.post(post).await?;
        post.social_id = receipt.social_id;
        post.status = PostStatus::Published;
        post.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl BrandAgent for ContentAgent {
    fn brand(&self) -> &BrandProfile {
        &self.brand
    }

    async fn run(&self) -> Result<Post, AgentError> {
        let topic = self.topic_at(self.published_count().await?)?.to_string();
        let trends = self.research(&topic).await?;

        let mut content = self.draft(&topic, &trends, None).await?;
        let mut embedding = self.providers.embedding.embed(&content).await?;

        if let Some((existing_id, similarity)) = self.nearest_duplicate(&embedding) {
            tracing::info!(brand_id = %self.brand.id, %existing_id, similarity, "draft too similar to past post, regenerating");
            content = self.draft(&topic, &trends, Some(&content)).await?;
            embedding = self.providers.embedding.embed(&content).await?;
            if let Some((existing_id, similarity)) = self.nearest_duplicate(&embedding) {
                self.activity.warn(format!(
                    "{}: skipped duplicate draft on '{topic}' (similarity {similarity:.2})",
                    self.brand.name
                ));
                return Err(AgentError::Duplicate {
                    existing_id,
                    similarity,
                });
            }
        }

        let mut post = Post::draft(self.brand.id.clone(), topic, content, self.brand.primary_platform());
        if let Err(err) = self.publish(&mut post).await {
            post.status = PostStatus::Failed;
            post.updated_at = Utc::now();
            self.store.save_post(&post).await?;
            return Err(err);
        }

        self.record_live(&post, Some(embedding)).await;

        tracing::info!(brand_id = %self.brand.id, post_id = %post.id, topic = %post.topic, "post published");
        self.activity.info(format!("{}: published post on '{}'", self.brand.name, post.topic));
        Ok(post)
    }

    async fn sync_analytics(&self) -> Result<SyncReport, AgentError> {
        let history = self.store.history(&self.brand.id).await?;
        let mut report = SyncReport::default();
        let mut last_error = None;

        for post in history.iter().filter(|p| p.is_published() && p.social_id.is_some()) {
            match self.providers.analytics.fetch(post).await {
                Ok(analytics) => {
                    self.store.update_analytics(&self.brand.id, &post.id, analytics).await?;
                    report.updated += 1;
                }
                Err(err) => {
                    tracing::warn!(brand_id = %self.brand.id, post_id = %post.id, error = %err, "analytics fetch failed");
                    report.failed += 1;
                    last_error = Some(err.to_string());
                }
            }
        }

        if report.updated == 0 {
            if let Some(last_error) = last_error {
                return Err(AgentError::AnalyticsSync {
                    attempted: report.failed,
                    last_error,
                });
            }
        }

        self.activity.info(format!(
            "{}: analytics synced ({} updated, {} failed)",
            self.brand.name, report.updated, report.failed
        ));
        Ok(report)
    }

    async fn plan_batch(&self, count: usize) -> Result<Vec<ScheduledPost>, AgentError> {
        let offset = self.published_count().await?;
        let spacing = Duration::hours(i64::from(self.brand.schedule_interval_hours.max(1)));
        let start = Utc::now();
        let mut planned = Vec::with_capacity(count);

        for i in 0..count {
            let topic = self.topic_at(offset + i)?.to_string();
            let trends = self.research(&topic).await?;
            let content = self.draft(&topic, &trends, None).await?;
            let now = Utc::now();
            let entry = ScheduledPost {
                id: PostId::generate(),
                brand_id: self.brand.id.clone(),
                topic,
                content,
                platform: self.brand.primary_platform().to_string(),
                status: PostStatus::PendingReview,
                scheduled_at: start + spacing * (i as i32 + 1),
                created_at: now,
                updated_at: now,
            };
            self.store.save_scheduled_post(&entry).await?;
            planned.push(entry);
        }

        self.activity.info(format!("{}: planned {} posts for review", self.brand.name, planned.len()));
        Ok(planned)
    }

    async fn scheduled_posts(&self) -> Result<Vec<ScheduledPost>, AgentError> {
        Ok(self.store.scheduled_posts(&self.brand.id).await?)
    }

    async fn publish_scheduled_post(&self, scheduled: &ScheduledPost) -> Result<Post, AgentError> {
        let mut post = scheduled.to_post();
        if let Err(err) = self.publish(&mut post).await {
            self.store
                .update_scheduled_post_status(&self.brand.id, &scheduled.id, PostStatus::Failed)
                .await?;
            self.activity.error(format!(
                "{}: scheduled post {} failed to publish: {err}",
                self.brand.name, scheduled.id
            ));
            return Err(err);
        }

        if let Err(err) = self
            .store
            .update_scheduled_post_status(&self.brand.id, &scheduled.id, PostStatus::Published)
            .await
        {
            tracing::error!(brand_id = %self.brand.id, scheduled_id = %scheduled.id, error = %err, "failed to mark scheduled post published");
        }
        self.record_live(&post, None).await;

        self.activity.info(format!("{}: published scheduled post {}", self.brand.name, scheduled.id));
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use quill_core::{Analytics, BrandId};
    use quill_memory::InMemoryBrandStore;
    use quill_observability::{LogBuffer, NoopActivityLog};
    use quill_tools::{MockAnalytics, MockLlm, MockSocialClient};

    use super::*;

    struct Fixture {
        store: Arc<InMemoryBrandStore>,
        index: Arc<VectorIndex>,
        social: Arc<MockSocialClient>,
        agent: ContentAgent,
    }

    fn brand() -> BrandProfile {
        BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme")
            .with_topics(["AI", "Cloud"])
            .with_anti_topics(["politics"])
            .with_platforms(["linkedin"])
    }

    fn fixture(llm: MockLlm, social: MockSocialClient) -> Fixture {
        let store = Arc::new(InMemoryBrandStore::with_brands([brand()]));
        let index = Arc::new(VectorIndex::in_memory());
        let social = Arc::new(social);
        let mut providers = Providers::mock();
        providers.llm = Arc::new(llm);
        providers.social = social.clone();
        let agent = ContentAgent::new(
            brand(),
            store.clone(),
            index.clone(),
            providers,
            Arc::new(NoopActivityLog),
        );
        Fixture {
            store,
            index,
            social,
            agent,
        }
    }

    #[tokio::test]
    async fn run_publishes_saves_and_indexes() {
        let f = fixture(MockLlm::scripted(["Edge AI is moving onto phones"]), MockSocialClient::new("linkedin"));

        let post = f.agent.run().await.unwrap();

        assert_eq!(post.topic, "AI");
        assert_eq!(post.platform, "linkedin");
        assert!(post.is_published());
        assert!(post.social_id.is_some());
        assert_eq!(f.social.calls(), 1);
        assert_eq!(f.store.history(&post.brand_id).await.unwrap().len(), 1);
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn topics_rotate_with_history() {
        let f = fixture(MockLlm::new(), MockSocialClient::new("linkedin"));
        let first = f.agent.run().await.unwrap();
        let second = f.agent.run().await.unwrap();
        assert_eq!(first.topic, "AI");
        assert_eq!(second.topic, "Cloud");
    }

    #[tokio::test]
    async fn duplicate_draft_is_regenerated_once_then_rejected() {
        let f = fixture(
            MockLlm::scripted(["same words", "same words", "same words"]),
            MockSocialClient::new("linkedin"),
        );
        f.agent.run().await.unwrap();

        let err = f.agent.run().await.unwrap_err();

        assert!(matches!(err, AgentError::Duplicate { similarity, .. } if similarity >= 0.92));
        assert_eq!(f.social.calls(), 1);
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn regenerated_draft_that_differs_is_published() {
        let f = fixture(
            MockLlm::scripted(["same words", "same words", "entirely fresh perspective"]),
            MockSocialClient::new("linkedin"),
        );
        f.agent.run().await.unwrap();

        let post = f.agent.run().await.unwrap();
        assert_eq!(post.content, "entirely fresh perspective");
        assert_eq!(f.index.len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_is_recorded_and_not_indexed() {
        let f = fixture(MockLlm::new(), MockSocialClient::failing("linkedin", "token expired"));

        let err = f.agent.run().await.unwrap_err();

        assert_eq!(err.to_string(), "token expired");
        let history = f.store.history(&brand().id).await.unwrap();
        assert_eq!(history[0].status, PostStatus::Failed);
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn failed_attempts_do_not_advance_topic_rotation() {
        let f = fixture(MockLlm::new(), MockSocialClient::failing("linkedin", "rate limited"));

        f.agent.run().await.unwrap_err();
        f.agent.run().await.unwrap_err();

        let history = f.store.history(&brand().id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|p| p.topic == "AI" && p.status == PostStatus::Failed));
    }

    #[tokio::test]
    async fn index_write_failure_after_publish_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let brand_dir = dir.path().join("acme");
        let index = Arc::new(VectorIndex::open(brand_dir.join("vectors.json")).unwrap());
        // A regular file where the index directory should be.
        std::fs::write(&brand_dir, b"x").unwrap();

        let store = Arc::new(InMemoryBrandStore::with_brands([brand()]));
        let social = Arc::new(MockSocialClient::new("linkedin"));
        let activity = Arc::new(LogBuffer::new(10));
        let mut providers = Providers::mock();
        providers.social = social.clone();
        let agent = ContentAgent::new(brand(), store.clone(), index.clone(), providers, activity);

        let post = agent.run().await.unwrap();

        assert!(post.is_published());
        assert_eq!(social.calls(), 1);
        assert!(index.is_empty());
        let history = store.history(&post.brand_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, post.id);
    }

    #[tokio::test]
    async fn sync_updates_published_posts() {
        let f = fixture(MockLlm::new(), MockSocialClient::new("linkedin"));
        let post = f.agent.run().await.unwrap();

        let report = f.agent.sync_analytics().await.unwrap();

        assert_eq!(report, SyncReport { updated: 1, failed: 0 });
        let history = f.store.history(&post.brand_id).await.unwrap();
        assert_eq!(history[0].analytics, Analytics { views: 100, likes: 10, shares: 2, comments: 1 });
    }

    #[tokio::test]
    async fn sync_fails_only_when_every_fetch_fails() {
        let store = Arc::new(InMemoryBrandStore::with_brands([brand()]));
        let mut providers = Providers::mock();
        providers.analytics = Arc::new(MockAnalytics::failing("api down"));
        let agent = ContentAgent::new(
            brand(),
            store.clone(),
            Arc::new(VectorIndex::in_memory()),
            providers,
            Arc::new(NoopActivityLog),
        );
        agent.run().await.unwrap();

        let err = agent.sync_analytics().await.unwrap_err();
        assert!(matches!(err, AgentError::AnalyticsSync { attempted: 1, .. }));

        let empty = fixture(MockLlm::new(), MockSocialClient::new("linkedin"));
        assert_eq!(empty.agent.sync_analytics().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn plan_batch_saves_spaced_entries_for_review() {
        let f = fixture(MockLlm::new(), MockSocialClient::new("linkedin"));

        let planned = f.agent.plan_batch(3).await.unwrap();

        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|p| p.status == PostStatus::PendingReview));
        assert_eq!(planned[1].scheduled_at - planned[0].scheduled_at, Duration::hours(24));
        let topics: Vec<&str> = planned.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["AI", "Cloud", "AI"]);
        assert_eq!(f.agent.scheduled_posts().await.unwrap().len(), 3);
        assert_eq!(f.social.calls(), 0);
    }

    #[tokio::test]
    async fn publish_scheduled_marks_entry_published() {
        let f = fixture(MockLlm::new(), MockSocialClient::new("linkedin"));
        let entry = f.agent.plan_batch(1).await.unwrap().remove(0);

        let post = f.agent.publish_scheduled_post(&entry).await.unwrap();

        assert_eq!(post.id, entry.id);
        assert!(post.is_published());
        let calendar = f.agent.scheduled_posts().await.unwrap();
        assert_eq!(calendar[0].status, PostStatus::Published);
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn publish_scheduled_failure_marks_entry_failed() {
        let activity = Arc::new(LogBuffer::new(10));
        let store = Arc::new(InMemoryBrandStore::with_brands([brand()]));
        let mut providers = Providers::mock();
        providers.social = Arc::new(MockSocialClient::failing("linkedin", "boom"));
        let agent = ContentAgent::new(
            brand(),
            store,
            Arc::new(VectorIndex::in_memory()),
            providers,
            activity.clone(),
        );
        let entry = agent.plan_batch(1).await.unwrap().remove(0);

        assert!(agent.publish_scheduled_post(&entry).await.is_err());
        assert_eq!(agent.scheduled_posts().await.unwrap()[0].status, PostStatus::Failed);
        assert!(activity.entries().iter().any(|e| e.message.contains("failed to publish")));
    }

    #[tokio::test]
    async fn brand_without_topics_cannot_run() {
        let bare = BrandProfile::new(BrandId::parse("bare").unwrap(), "Bare");
        let agent = ContentAgent::new(
            bare.clone(),
            Arc::new(InMemoryBrandStore::with_brands([bare])),
            Arc::new(VectorIndex::in_memory()),
            Providers::mock(),
            Arc::new(NoopActivityLog),
        );
        assert!(matches!(agent.run().await, Err(AgentError::NoTopics(_))));
    }
}
