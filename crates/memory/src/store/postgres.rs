//! Postgres-backed brand repository.
//!
//! Three tables, all keyed by brand: `quill_brands`, `quill_posts` and
//! `quill_scheduled_posts`. Posts and calendar entries use `(brand_id, id)` as
//! their primary key, so one brand can never overwrite another's records.
//!
//! ## Error Mapping
//!
//! SQLx errors become `StoreError::Database` carrying the operation name. Rows
//! that fail validation (bad ids, unknown status) become `StoreError::Invalid`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::instrument;

use quill_core::{Analytics, BrandId, BrandProfile, Post, PostId, PostStatus, ScheduledPost};

use super::{BrandStore, StoreError};

const BRAND_COLUMNS: &str = "id, user_id, name, industry, voice, target_audience, topics, anti_topics, \
                             platforms, schedule_interval_hours";
const POST_COLUMNS: &str = "id, brand_id, social_id, topic, content, platform, status, \
                            views, likes, shares, comments, created_at, updated_at";
const SCHEDULED_COLUMNS: &str = "id, brand_id, topic, content, platform, status, scheduled_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresBrandStore {
    pool: PgPool,
}

impl PostgresBrandStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS quill_brands (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                industry TEXT NOT NULL DEFAULT '',
                voice TEXT NOT NULL DEFAULT '',
                target_audience TEXT NOT NULL DEFAULT '',
                topics TEXT[] NOT NULL DEFAULT '{}',
                anti_topics TEXT[] NOT NULL DEFAULT '{}',
                platforms TEXT[] NOT NULL DEFAULT '{}',
                schedule_interval_hours INTEGER NOT NULL DEFAULT 24
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS quill_posts (
                id TEXT NOT NULL,
                brand_id TEXT NOT NULL REFERENCES quill_brands (id) ON DELETE CASCADE,
                social_id TEXT,
                topic TEXT NOT NULL,
                content TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                likes BIGINT NOT NULL DEFAULT 0,
                shares BIGINT NOT NULL DEFAULT 0,
                comments BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (brand_id, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS quill_scheduled_posts (
                id TEXT NOT NULL,
                brand_id TEXT NOT NULL REFERENCES quill_brands (id) ON DELETE CASCADE,
                topic TEXT NOT NULL,
                content TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                scheduled_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (brand_id, id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS quill_scheduled_due_idx ON quill_scheduled_posts (brand_id, status, scheduled_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn ensure_brand(&self, brand_id: &BrandId) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM quill_brands WHERE id = $1")
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_brand", e))?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::brand_not_found(brand_id)),
        }
    }
}

#[async_trait]
impl BrandStore for PostgresBrandStore {
    #[instrument(skip_all, fields(brand_id = %brand_id), err)]
    async fn get_brand(&self, brand_id: &BrandId) -> Result<BrandProfile, StoreError> {
        let row = sqlx::query(&format!("SELECT {BRAND_COLUMNS} FROM quill_brands WHERE id = $1"))
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_brand", e))?
            .ok_or_else(|| StoreError::brand_not_found(brand_id))?;
        brand_from_row(&row)
    }

    async fn list_brands(&self) -> Result<Vec<BrandProfile>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {BRAND_COLUMNS} FROM quill_brands ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_brands", e))?;
        rows.iter().map(brand_from_row).collect()
    }

    #[instrument(skip_all, fields(brand_id = %brand.id), err)]
    async fn save_brand(&self, brand: &BrandProfile) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO quill_brands ({BRAND_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 user_id = EXCLUDED.user_id, name = EXCLUDED.name, industry = EXCLUDED.industry, \
                 voice = EXCLUDED.voice, target_audience = EXCLUDED.target_audience, \
                 topics = EXCLUDED.topics, anti_topics = EXCLUDED.anti_topics, \
                 platforms = EXCLUDED.platforms, schedule_interval_hours = EXCLUDED.schedule_interval_hours"
        ))
        .bind(brand.id.as_str())
        .bind(&brand.user_id)
        .bind(&brand.name)
        .bind(&brand.industry)
        .bind(&brand.voice)
        .bind(&brand.target_audience)
        .bind(&brand.topics)
        .bind(&brand.anti_topics)
        .bind(&brand.platforms)
        .bind(i32::try_from(brand.schedule_interval_hours).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_brand", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(brand_id = %post.brand_id, post_id = %post.id), err)]
    async fn save_post(&self, post: &Post) -> Result<(), StoreError> {
        self.ensure_brand(&post.brand_id).await?;
        sqlx::query(&format!(
            "INSERT INTO quill_posts ({POST_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (brand_id, id) DO UPDATE SET \
                 social_id = EXCLUDED.social_id, topic = EXCLUDED.topic, content = EXCLUDED.content, \
                 platform = EXCLUDED.platform, status = EXCLUDED.status, views = EXCLUDED.views, \
                 likes = EXCLUDED.likes, shares = EXCLUDED.shares, comments = EXCLUDED.comments, \
                 updated_at = EXCLUDED.updated_at"
        ))
        .bind(post.id.as_str())
        .bind(post.brand_id.as_str())
        .bind(post.social_id.as_deref())
        .bind(&post.topic)
        .bind(&post.content)
        .bind(&post.platform)
        .bind(post.status.as_str())
        .bind(counter_to_db(post.analytics.views))
        .bind(counter_to_db(post.analytics.likes))
        .bind(counter_to_db(post.analytics.shares))
        .bind(counter_to_db(post.analytics.comments))
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_post", e))?;
        Ok(())
    }

    async fn history(&self, brand_id: &BrandId) -> Result<Vec<Post>, StoreError> {
        self.ensure_brand(brand_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM quill_posts WHERE brand_id = $1 ORDER BY created_at, id"
        ))
        .bind(brand_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;
        rows.iter().map(post_from_row).collect()
    }

    #[instrument(skip_all, fields(brand_id = %brand_id, post_id = %post_id), err)]
    async fn update_analytics(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        analytics: Analytics,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE quill_posts SET views = $3, likes = $4, shares = $5, comments = $6, updated_at = $7 \
             WHERE brand_id = $1 AND id = $2",
        )
        .bind(brand_id.as_str())
        .bind(post_id.as_str())
        .bind(counter_to_db(analytics.views))
        .bind(counter_to_db(analytics.likes))
        .bind(counter_to_db(analytics.shares))
        .bind(counter_to_db(analytics.comments))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_analytics", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("post {post_id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(brand_id = %post.brand_id, post_id = %post.id), err)]
    async fn save_scheduled_post(&self, post: &ScheduledPost) -> Result<(), StoreError> {
        self.ensure_brand(&post.brand_id).await?;
        sqlx::query(&format!(
            "INSERT INTO quill_scheduled_posts ({SCHEDULED_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (brand_id, id) DO UPDATE SET \
                 topic = EXCLUDED.topic, content = EXCLUDED.content, platform = EXCLUDED.platform, \
                 status = EXCLUDED.status, scheduled_at = EXCLUDED.scheduled_at, \
                 updated_at = EXCLUDED.updated_at"
        ))
        .bind(post.id.as_str())
        .bind(post.brand_id.as_str())
        .bind(&post.topic)
        .bind(&post.content)
        .bind(&post.platform)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_scheduled_post", e))?;
        Ok(())
    }

    async fn scheduled_posts(&self, brand_id: &BrandId) -> Result<Vec<ScheduledPost>, StoreError> {
        self.ensure_brand(brand_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM quill_scheduled_posts WHERE brand_id = $1 ORDER BY scheduled_at, id"
        ))
        .bind(brand_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("scheduled_posts", e))?;
        rows.iter().map(scheduled_from_row).collect()
    }

    #[instrument(skip_all, fields(brand_id = %brand_id, post_id = %post_id, %status), err)]
    async fn update_scheduled_post_status(
        &self,
        brand_id: &BrandId,
        post_id: &PostId,
        status: PostStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE quill_scheduled_posts SET status = $3, updated_at = $4 WHERE brand_id = $1 AND id = $2",
        )
        .bind(brand_id.as_str())
        .bind(post_id.as_str())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_scheduled_post_status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("scheduled post {post_id}")));
        }
        Ok(())
    }

    async fn due_scheduled_posts(
        &self,
        brand_id: &BrandId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledPost>, StoreError> {
        self.ensure_brand(brand_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM quill_scheduled_posts \
             WHERE brand_id = $1 AND status = $2 AND scheduled_at <= $3 \
             ORDER BY scheduled_at, id"
        ))
        .bind(brand_id.as_str())
        .bind(PostStatus::Scheduled.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("due_scheduled_posts", e))?;
        rows.iter().map(scheduled_from_row).collect()
    }
}

fn brand_from_row(row: &PgRow) -> Result<BrandProfile, StoreError> {
    let decode = |e| map_sqlx_error("decode_brand", e);
    let id: String = row.try_get("id").map_err(decode)?;
    let hours: i32 = row.try_get("schedule_interval_hours").map_err(decode)?;

    Ok(BrandProfile {
        id: parse_brand_id(id)?,
        user_id: row.try_get("user_id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        industry: row.try_get("industry").map_err(decode)?,
        voice: row.try_get("voice").map_err(decode)?,
        target_audience: row.try_get("target_audience").map_err(decode)?,
        topics: row.try_get("topics").map_err(decode)?,
        anti_topics: row.try_get("anti_topics").map_err(decode)?,
        platforms: row.try_get("platforms").map_err(decode)?,
        schedule_interval_hours: u32::try_from(hours).unwrap_or(0),
    })
}

fn post_from_row(row: &PgRow) -> Result<Post, StoreError> {
    let decode = |e| map_sqlx_error("decode_post", e);
    let id: String = row.try_get("id").map_err(decode)?;
    let brand_id: String = row.try_get("brand_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(Post {
        id: parse_post_id(id)?,
        brand_id: parse_brand_id(brand_id)?,
        social_id: row.try_get("social_id").map_err(decode)?,
        topic: row.try_get("topic").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        platform: row.try_get("platform").map_err(decode)?,
        status: parse_status(&status)?,
        analytics: Analytics {
            views: counter_from_db(row.try_get("views").map_err(decode)?),
            likes: counter_from_db(row.try_get("likes").map_err(decode)?),
            shares: counter_from_db(row.try_get("shares").map_err(decode)?),
            comments: counter_from_db(row.try_get("comments").map_err(decode)?),
        },
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn scheduled_from_row(row: &PgRow) -> Result<ScheduledPost, StoreError> {
    let decode = |e| map_sqlx_error("decode_scheduled_post", e);
    let id: String = row.try_get("id").map_err(decode)?;
    let brand_id: String = row.try_get("brand_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(ScheduledPost {
        id: parse_post_id(id)?,
        brand_id: parse_brand_id(brand_id)?,
        topic: row.try_get("topic").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        platform: row.try_get("platform").map_err(decode)?,
        status: parse_status(&status)?,
        scheduled_at: row.try_get("scheduled_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn parse_brand_id(value: String) -> Result<BrandId, StoreError> {
    BrandId::parse(value).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn parse_post_id(value: String) -> Result<PostId, StoreError> {
    PostId::parse(value).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn parse_status(value: &str) -> Result<PostStatus, StoreError> {
    PostStatus::parse(value).ok_or_else(|| StoreError::Invalid(format!("unknown post status '{value}'")))
}

fn counter_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn counter_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Database(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {}", operation)),
        other => StoreError::Database(format!("sqlx error in {}: {}", operation, other)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn counters_saturate_at_the_column_range() {
        assert_eq!(counter_to_db(u64::MAX), i64::MAX);
        assert_eq!(counter_from_db(-1), 0);
        assert_eq!(counter_from_db(42), 42);
    }

    #[test]
    fn unknown_status_is_an_invalid_record() {
        assert!(matches!(parse_status("archived"), Err(StoreError::Invalid(_))));
        assert_eq!(parse_status("pending_review").unwrap(), PostStatus::PendingReview);
    }

    /// Runs only when `QUILL_TEST_DATABASE_URL` points at a scratch database.
    #[tokio::test]
    #[ignore = "requires a Postgres instance"]
    async fn brand_records_round_trip_against_postgres() {
        let Ok(url) = std::env::var("QUILL_TEST_DATABASE_URL") else {
            return;
        };
        let store = PostgresBrandStore::connect(&url).await.unwrap();
        sqlx::query("DELETE FROM quill_brands WHERE id IN ('pg-acme', 'pg-globex')")
            .execute(&store.pool)
            .await
            .unwrap();

        let acme = BrandProfile::new(BrandId::parse("pg-acme").unwrap(), "Acme")
            .with_topics(["AI", "Cloud"])
            .with_platforms(["linkedin"]);
        let globex = BrandProfile::new(BrandId::parse("pg-globex").unwrap(), "Globex");
        store.save_brand(&acme).await.unwrap();
        store.save_brand(&globex).await.unwrap();
        assert_eq!(store.get_brand(&acme.id).await.unwrap(), acme);

        let mut post = Post::draft(acme.id.clone(), "AI", "hello", "linkedin");
        post.status = PostStatus::Published;
        post.social_id = Some("urn:li:share:1".into());
        store.save_post(&post).await.unwrap();
        let counters = Analytics { views: 5, likes: 2, shares: 1, comments: 0 };
        store.update_analytics(&acme.id, &post.id, counters).await.unwrap();

        let history = store.history(&acme.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].analytics, counters);
        assert!(store.history(&globex.id).await.unwrap().is_empty());
        assert!(matches!(
            store.update_analytics(&globex.id, &post.id, counters).await,
            Err(StoreError::NotFound(_))
        ));

        let now = Utc::now();
        let entry = ScheduledPost {
            id: PostId::generate(),
            brand_id: acme.id.clone(),
            topic: "Cloud".into(),
            content: "soon".into(),
            platform: "linkedin".into(),
            status: PostStatus::Scheduled,
            scheduled_at: now - Duration::minutes(5),
            created_at: now,
            updated_at: now,
        };
        store.save_scheduled_post(&entry).await.unwrap();
        assert_eq!(store.due_scheduled_posts(&acme.id, now).await.unwrap().len(), 1);

        store
            .update_scheduled_post_status(&acme.id, &entry.id, PostStatus::Published)
            .await
            .unwrap();
        assert!(store.due_scheduled_posts(&acme.id, now).await.unwrap().is_empty());

        let ghost = BrandId::parse("pg-ghost").unwrap();
        assert!(matches!(store.history(&ghost).await, Err(StoreError::NotFound(_))));
    }
}
