//! JSON-file brand repository.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<brand_id>/config.json    BrandProfile
//! <base>/<brand_id>/history.json   [Post]
//! <base>/<brand_id>/calendar.json  [ScheduledPost]
//! <base>/<brand_id>/vectors.json   VectorIndex (owned by the agent)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use quill_core::{Analytics, BrandId, BrandProfile, Post, PostId, PostStatus, ScheduledPost};

use super::{BrandStore, StoreError, set_analytics, set_scheduled_status, upsert_post, upsert_scheduled};

const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.json";
const CALENDAR_FILE: &str = "calendar.json";

/// Brand repository backed by one directory per brand.
///
/// Read-modify-write cycles are serialized through a single async mutex so
/// concurrent updates of the same file cannot lose writes.
#[derive(Debug)]
pub struct FileBrandStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBrandStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn brand_dir(&self, brand_id: &BrandId) -> PathBuf {
        self.base_dir.join(brand_id.as_str())
    }

    fn file(&self, brand_id: &BrandId, name: &str) -> PathBuf {
        self.brand_dir(brand_id).join(name)
    }

    async fn ensure_brand(&self, brand_id: &BrandId) -> Result<(), StoreError> {
        match tokio::fs::metadata(self.file(brand_id, CONFIG_FILE)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::brand_not_found(brand_id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    Ok(read_json(path).await?.unwrap_or_default())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl BrandStore for FileBrandStore {
    async fn get_brand(&self, brand_id: &BrandId) -> Result<BrandProfile, StoreError> {
        read_json(&self.file(brand_id, CONFIG_FILE))
            .await?
            .ok_or_else(|| StoreError::brand_not_found(brand_id))
    }

    async fn list_brands(&self) -> Result<Vec<BrandProfile>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut brands = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let config = entry.path().join(CONFIG_FILE);
            match read_json::<BrandProfile>(&config).await {
                Ok(Some(brand)) => brands.push(brand),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %config.display(), error = %err, "skipping unreadable brand config");
                }
            }
        }

        brands.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(brands)
    }

    async fn save_brand(&self, brand: &BrandProfile) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.file(&brand.id, CONFIG_FILE), brand).await
    }

    async fn save_post(&self, post: &Post) -> Result<(), StoreError> {
        self.ensure_brand(&post.brand_id).await?;
        let _guard = self.write_lock.lock().await;
        let path = self.file(&post.brand_id, HISTORY_FILE);
        let mut history: Vec<Post> = read_list(&path).await?;
        upsert_post(&mut history, post);
        write_json(&path, &history).await
    }

    async fn history(&self, brand_id: &BrandId) -> Result<Vec<Post>, StoreError> {
        self.ensure_brand(brand_id).await?;
        read_list(&self.file(brand_id, HISTORY_FILE)).await
    }

    async fn update_analytics(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        analytics: Analytics,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.file(brand_id, HISTORY_FILE);
        let mut history: Vec<Post> = read_list(&path).await?;
        set_analytics(&mut history, post_id, analytics)?;
        write_json(&path, &history).await
    }

    async fn save_scheduled_post(&self, post: &ScheduledPost) -> Result<(), StoreError> {
        self.ensure_brand(&post.brand_id).await?;
        let _guard = self.write_lock.lock().await;
        let path = self.file(&post.brand_id, CALENDAR_FILE);
        let mut calendar: Vec<ScheduledPost> = read_list(&path).await?;
        upsert_scheduled(&mut calendar, post);
        write_json(&path, &calendar).await
    }

    async fn scheduled_posts(&self, brand_id: &BrandId) -> Result<Vec<ScheduledPost>, StoreError> {
        self.ensure_brand(brand_id).await?;
        read_list(&self.file(brand_id, CALENDAR_FILE)).await
    }

    async fn update_scheduled_post_status(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        status: PostStatus,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.file(brand_id, CALENDAR_FILE);
        let mut calendar: Vec<ScheduledPost> = read_list(&path).await?;
        set_scheduled_status(&mut calendar, post_id, status)?;
        write_json(&path, &calendar).await
    }
}
