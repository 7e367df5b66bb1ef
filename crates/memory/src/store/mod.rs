//! Brand repository: profiles, post history and the content calendar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quill_core::{Analytics, BrandId, BrandProfile, Post, PostId, PostStatus, ScheduledPost};

mod file;
mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use file::FileBrandStore;
pub use in_memory::InMemoryBrandStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBrandStore;

/// Brand repository error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage {0}")]
    Database(String),
}

impl StoreError {
    pub fn brand_not_found(brand_id: &BrandId) -> Self {
        Self::NotFound(format!("brand {brand_id}"))
    }
}

/// Persistence for everything scoped to a brand.
///
/// All operations are keyed by [`BrandId`]; implementations never leak records
/// across brands.
#[async_trait]
pub trait BrandStore: Send + Sync {
    async fn get_brand(&self, brand_id: &BrandId) -> Result<BrandProfile, StoreError>;

    async fn list_brands(&self) -> Result<Vec<BrandProfile>, StoreError>;

    async fn save_brand(&self, brand: &BrandProfile) -> Result<(), StoreError>;

    /// Insert or replace (by id) a post in the brand's history.
    async fn save_post(&self, post: &Post) -> Result<(), StoreError>;

    /// Post history, oldest first.
    async fn history(&self, brand_id: &BrandId) -> Result<Vec<Post>, StoreError>;

    async fn update_analytics(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        analytics: Analytics,
    ) -> Result<(), StoreError>;

    /// Insert or replace (by id) a calendar entry.
    async fn save_scheduled_post(&self, post: &ScheduledPost) -> Result<(), StoreError>;

    /// Calendar entries ordered by `scheduled_at`.
    async fn scheduled_posts(&self, brand_id: &BrandId) -> Result<Vec<ScheduledPost>, StoreError>;

    async fn update_scheduled_post_status(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        status: PostStatus,
    ) -> Result<(), StoreError>;

    /// Calendar entries with status `scheduled` whose slot is at or before `now`.
    async fn due_scheduled_posts(
        &self,
        brand_id: &BrandId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledPost>, StoreError> {
        let posts = self.scheduled_posts(brand_id).await?;
        Ok(posts.into_iter().filter(|p| p.is_due(now)).collect())
    }
}

pub(crate) fn upsert_post(history: &mut Vec<Post>, post: &Post) {
    match history.iter_mut().find(|p| p.id == post.id) {
        Some(existing) => *existing = post.clone(),
        None => history.push(post.clone()),
    }
}

pub(crate) fn upsert_scheduled(calendar: &mut Vec<ScheduledPost>, post: &ScheduledPost) {
    match calendar.iter_mut().find(|p| p.id == post.id) {
        Some(existing) => *existing = post.clone(),
        None => calendar.push(post.clone()),
    }
    calendar.sort_by_key(|p| p.scheduled_at);
}

pub(crate) fn set_analytics(
    history: &mut [Post],
    post_id: &PostId,
    analytics: Analytics,
) -> Result<(), StoreError> {
    let post = history
        .iter_mut()
        .find(|p| &p.id == post_id)
        .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
    post.analytics = analytics;
    post.updated_at = Utc::now();
    Ok(())
}

pub(crate) fn set_scheduled_status(
    calendar: &mut [ScheduledPost],
    post_id: &PostId,
    status: PostStatus,
) -> Result<(), StoreError> {
    let post = calendar
        .iter_mut()
        .find(|p| &p.id == post_id)
        .ok_or_else(|| StoreError::NotFound(format!("scheduled post {post_id}")))?;
    post.status = status;
    post.updated_at = Utc::now();
    Ok(())
}
