//! Postgres-backed job queue.
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED`, so any number of worker processes
//! can share one table without handing the same job to two of them. `ack` and
//! `fail` match on the row's `lease_id`, so a holder whose lease was reclaimed
//! cannot resolve the job.
//!
//! ## Error Mapping
//!
//! Every SQLx error becomes `QueueError::Storage` carrying the operation name.
//! Rows that cannot be decoded (unknown status, invalid brand id) are reported
//! the same way.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;
use quill_core::{BrandId, JobId};

use super::{JobQueue, LEASE_EXPIRED, check_lease, QueueError, QueueSettings, QueueStats};
use crate::job::{FailOutcome, Job, JobStatus, JobType, after};

const COLUMNS: &str = "id, brand_id, job_type, payload, retries, status, last_error, \
                       available_at, leased_until, lease_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    settings: QueueSettings,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }

    /// Connect and make sure the jobs table exists.
    pub async fn connect(database_url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let queue = Self::new(pool, settings);
        queue.migrate().await?;
        Ok(queue)
    }

    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quill_jobs (
                id UUID PRIMARY KEY,
                brand_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '',
                retries INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                last_error TEXT,
                available_at TIMESTAMPTZ NOT NULL,
                leased_until TIMESTAMPTZ,
                lease_id UUID,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;

        sqlx::query("ALTER TABLE quill_jobs ADD COLUMN IF NOT EXISTS lease_id UUID")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS quill_jobs_ready_idx ON quill_jobs (status, available_at, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;

        Ok(())
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Apply the retry policy to every lease that ran out.
    async fn reclaim_expired(&self, conn: &mut PgConnection, now: DateTime<Utc>) -> Result<(), QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM quill_jobs \
             WHERE status = 'leased' AND leased_until <= $1 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(now)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("reclaim_expired", e))?;

        for row in rows {
            let mut job = job_from_row(&row)?;
            let outcome = job.record_failure(LEASE_EXPIRED, true, &self.settings.retry, now);
            write_job(&mut *conn, &job).await?;
            tracing::warn!(job_id = %job.id, brand_id = %job.brand_id, ?outcome, "reclaimed expired lease");
        }
        Ok(())
    }

    /// Why an `ack` matched no row.
    async fn rejection(&self, id: JobId, lease_id: Uuid) -> QueueError {
        match self.get(id).await {
            Ok(Some(job)) => check_lease(&job, lease_id).err().unwrap_or(QueueError::LeaseLost(id)),
            Ok(None) => QueueError::NotFound(id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip_all, fields(brand_id = %brand_id, job_type = %job_type), err)]
    async fn enqueue(&self, brand_id: BrandId, job_type: JobType, payload: String) -> Result<Job, QueueError> {
        let job = Job::new(brand_id, job_type, payload);
        sqlx::query(&format!(
            "INSERT INTO quill_jobs ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(Uuid::from(job.id))
        .bind(job.brand_id.as_str())
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(retries_to_db(job.retries))
        .bind(job.status.as_str())
        .bind(job.last_error.as_deref())
        .bind(job.available_at)
        .bind(job.leased_until)
        .bind(job.lease_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(job)
    }

    #[instrument(skip_all, err)]
    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("dequeue", e))?;

        self.reclaim_expired(&mut tx, now).await?;

        let row = sqlx::query(&format!(
            "UPDATE quill_jobs SET status = 'leased', leased_until = $2, lease_id = $3, updated_at = $1 \
             WHERE id = ( \
                 SELECT id FROM quill_jobs \
                 WHERE status = 'pending' AND available_at <= $1 \
                 ORDER BY created_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        ))
        .bind(now)
        .bind(after(now, self.settings.lease_timeout))
        .bind(Uuid::now_v7())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("dequeue", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("dequeue", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip_all, fields(job_id = %id), err)]
    async fn ack(&self, id: JobId, lease_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE quill_jobs SET status = 'completed', leased_until = NULL, lease_id = NULL, updated_at = $2 \
             WHERE id = $1 AND status = 'leased' AND lease_id = $3",
        )
        .bind(Uuid::from(id))
        .bind(Utc::now())
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ack", e))?;

        if result.rows_affected() == 0 {
            return Err(self.rejection(id, lease_id).await);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %id), err)]
    async fn fail(&self, id: JobId, lease_id: Uuid, reason: &str, retry: bool) -> Result<FailOutcome, QueueError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("fail", e))?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM quill_jobs WHERE id = $1 FOR UPDATE"))
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("fail", e))?
            .ok_or(QueueError::NotFound(id))?;

        let mut job = job_from_row(&row)?;
        check_lease(&job, lease_id)?;

        let outcome = job.record_failure(reason, retry, &self.settings.retry, Utc::now());
        write_job(&mut tx, &job).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("fail", e))?;
        Ok(outcome)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM quill_jobs WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM quill_jobs \
             WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at, id \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(job_from_row).collect()
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM quill_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("stats", e))?;
            stats.add(parse_status(&status)?, usize::try_from(total).unwrap_or(0));
        }
        Ok(stats)
    }
}

/// Persist the mutable part of a job row.
async fn write_job(conn: &mut PgConnection, job: &Job) -> Result<(), QueueError> {
    sqlx::query(
        "UPDATE quill_jobs SET retries = $2, status = $3, last_error = $4, \
         available_at = $5, leased_until = $6, lease_id = $7, updated_at = $8 \
         WHERE id = $1",
    )
    .bind(Uuid::from(job.id))
    .bind(retries_to_db(job.retries))
    .bind(job.status.as_str())
    .bind(job.last_error.as_deref())
    .bind(job.available_at)
    .bind(job.leased_until)
    .bind(job.lease_id)
    .bind(job.updated_at)
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("write_job", e))?;
    Ok(())
}

fn job_from_row(row: &PgRow) -> Result<Job, QueueError> {
    let decode = |e| map_sqlx_error("decode_job", e);

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let brand_id: String = row.try_get("brand_id").map_err(decode)?;
    let job_type: String = row.try_get("job_type").map_err(decode)?;
    let retries: i32 = row.try_get("retries").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(Job {
        id: JobId::from_uuid(id),
        brand_id: BrandId::parse(brand_id).map_err(|e| QueueError::Storage(format!("job {id}: {e}")))?,
        job_type: JobType::parse(&job_type),
        payload: row.try_get("payload").map_err(decode)?,
        retries: u32::try_from(retries).unwrap_or(0),
        status: parse_status(&status)?,
        last_error: row.try_get("last_error").map_err(decode)?,
        available_at: row.try_get("available_at").map_err(decode)?,
        leased_until: row.try_get("leased_until").map_err(decode)?,
        lease_id: row.try_get("lease_id").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn parse_status(value: &str) -> Result<JobStatus, QueueError> {
    JobStatus::parse(value).ok_or_else(|| QueueError::Storage(format!("unknown job status '{value}'")))
}

fn retries_to_db(retries: u32) -> i32 {
    i32::try_from(retries).unwrap_or(i32::MAX)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            QueueError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => QueueError::Storage(format!("connection pool closed in {}", operation)),
        other => QueueError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}
