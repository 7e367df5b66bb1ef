//! In-memory brand repository for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use quill_core::{Analytics, BrandId, BrandProfile, Post, PostId, PostStatus, ScheduledPost};

use super::{BrandStore, StoreError, set_analytics, set_scheduled_status, upsert_post, upsert_scheduled};

#[derive(Debug, Default)]
struct State {
    brands: HashMap<BrandId, BrandProfile>,
    history: HashMap<BrandId, Vec<Post>>,
    calendar: HashMap<BrandId, Vec<ScheduledPost>>,
}

impl State {
    fn ensure_brand(&self, brand_id: &BrandId) -> Result<(), StoreError> {
        if self.brands.contains_key(brand_id) {
            Ok(())
        } else {
            Err(StoreError::brand_not_found(brand_id))
        }
    }
}

/// Brand repository that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryBrandStore {
    state: RwLock<State>,
}

impl InMemoryBrandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed with the given brands.
    pub fn with_brands(brands: impl IntoIterator<Item = BrandProfile>) -> Self {
        let store = Self::new();
        {
            let mut state = store.write();
            for brand in brands {
                state.brands.insert(brand.id.clone(), brand);
            }
        }
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrandStore for InMemoryBrandStore {
    async fn get_brand(&self, brand_id: &BrandId) -> Result<BrandProfile, StoreError> {
        self.read()
            .brands
            .get(brand_id)
            .cloned()
            .ok_or_else(|| StoreError::brand_not_found(brand_id))
    }

    async fn list_brands(&self) -> Result<Vec<BrandProfile>, StoreError> {
        let mut brands: Vec<_> = self.read().brands.values().cloned().collect();
        brands.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(brands)
    }

    async fn save_brand(&self, brand: &BrandProfile) -> Result<(), StoreError> {
        self.write().brands.insert(brand.id.clone(), brand.clone());
        Ok(())
    }

    async fn save_post(&self, post: &Post) -> Result<(), StoreError> {
        let mut state = self.write();
        state.ensure_brand(&post.brand_id)?;
        upsert_post(state.history.entry(post.brand_id.clone()).or_default(), post);
        Ok(())
    }

    async fn history(&self, brand_id: &BrandId) -> Result<Vec<Post>, StoreError> {
        let state = self.read();
        state.ensure_brand(brand_id)?;
        Ok(state.history.get(brand_id).cloned().unwrap_or_default())
    }

    async fn update_analytics(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        analytics: Analytics,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let history = state.history.entry(brand_id.clone()).or_default();
        set_analytics(history, post_id, analytics)
    }

    async fn save_scheduled_post(&self, post: &ScheduledPost) -> Result<(), StoreError> {
        let mut state = self.write();
        state.ensure_brand(&post.brand_id)?;
        upsert_scheduled(state.calendar.entry(post.brand_id.clone()).or_default(), post);
        Ok(())
    }

    async fn scheduled_posts(&self, brand_id: &BrandId) -> Result<Vec<ScheduledPost>, StoreError> {
        let state = self.read();
        state.ensure_brand(brand_id)?;
        Ok(state.calendar.get(brand_id).cloned().unwrap_or_default())
    }

    async fn update_scheduled_post_status(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        status: PostStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let calendar = state.calendar.entry(brand_id.clone()).or_default();
        set_scheduled_status(calendar, post_id, status)
    }
}

#[async_trait]
impl<S: BrandStore + ?Sized> BrandStore for Arc<S> {
    async fn get_brand(&self, brand_id: &BrandId) -> Result<BrandProfile, StoreError> {
        (**self).get_brand(brand_id).await
    }

    async fn list_brands(&self) -> Result<Vec<BrandProfile>, StoreError> {
        (**self).list_brands().await
    }

    async fn save_brand(&self, brand: &BrandProfile) -> Result<(), StoreError> {
        (**self).save_brand(brand).await
    }

    async fn save_post(&self, post: &Post) -> Result<(), StoreError> {
        (**self).save_post(post).await
    }

    async fn history(&self, brand_id: &BrandId) -> Result<Vec<Post>, StoreError> {
        (**self).history(brand_id).await
    }

    async fn update_analytics(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        analytics: Analytics,
    ) -> Result<(), StoreError> {
        (**self).update_analytics(brand_id, post_id, analytics).await
    }

    async fn save_scheduled_post(&self, post: &ScheduledPost) -> Result<(), StoreError> {
        (**self).save_scheduled_post(post).await
    }

    async fn scheduled_posts(&self, brand_id: &BrandId) -> Result<Vec<ScheduledPost>, StoreError> {
        (**self).scheduled_posts(brand_id).await
    }

    async fn update_scheduled_post_status(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        status: PostStatus,
    ) -> Result<(), StoreError> {
        (**self).update_scheduled_post_status(brand_id, post_id, status).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[tokio::test]
    async fn records_are_isolated_per_brand() {
        let acme = BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme");
        let globex = BrandProfile::new(BrandId::parse("globex").unwrap(), "Globex");
        let store = InMemoryBrandStore::with_brands([acme.clone(), globex.clone()]);

        store
            .save_post(&Post::draft(acme.id.clone(), "AI", "one", "linkedin"))
            .await
            .unwrap();

        assert_eq!(store.history(&acme.id).await.unwrap().len(), 1);
        assert!(store.history(&globex.id).await.unwrap().is_empty());
        assert_eq!(store.list_brands().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn writes_for_unknown_brand_are_rejected() {
        let store = InMemoryBrandStore::new();
        let post = Post::draft(BrandId::parse("ghost").unwrap(), "AI", "x", "linkedin");
        assert!(matches!(store.save_post(&post).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn scheduled_status_update_changes_due_set() {
        let acme = BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme");
        let store = InMemoryBrandStore::with_brands([acme.clone()]);
        let now = Utc::now();
        let entry = ScheduledPost {
            id: PostId::parse("p1").unwrap(),
            brand_id: acme.id.clone(),
            topic: "AI".into(),
            content: "ship it".into(),
            platform: "twitter".into(),
            status: PostStatus::Scheduled,
            scheduled_at: now - Duration::minutes(1),
            created_at: now,
            updated_at: now,
        };
        store.save_scheduled_post(&entry).await.unwrap();

        assert_eq!(store.due_scheduled_posts(&acme.id, now).await.unwrap().len(), 1);

        store
            .update_scheduled_post_status(&acme.id, &entry.id, PostStatus::Failed)
            .await
            .unwrap();
        assert!(store.due_scheduled_posts(&acme.id, now).await.unwrap().is_empty());
    }
}
