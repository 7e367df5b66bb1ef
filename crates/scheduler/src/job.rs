//! Core job types and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quill_core::{BrandId, JobId};

/// What a job asks the brand's agent to do.
///
/// Unrecognized type strings survive as [`JobType::Unknown`] so the worker can
/// fail them explicitly instead of dropping them at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    /// Research, generate and publish one post.
    Run,
    /// Refresh analytics of published posts.
    Sync,
    /// Draft a batch of calendar entries.
    Plan,
    /// Publish the calendar entry named by the payload.
    Publish,
    Unknown(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            JobType::Run => "run",
            JobType::Sync => "sync",
            JobType::Plan => "plan",
            JobType::Publish => "publish",
            JobType::Unknown(other) => other,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "run" => JobType::Run,
            "sync" => JobType::Sync,
            "plan" => JobType::Plan,
            "publish" => JobType::Publish,
            _ => JobType::Unknown(value.to_string()),
        }
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        match value {
            JobType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue-side lifecycle of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be leased (possibly not before `available_at`).
    Pending,
    /// Held by exactly one worker until `leased_until`.
    Leased,
    /// Acknowledged.
    Completed,
    /// Permanently failed; kept for inspection.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "leased" => Some(JobStatus::Leased),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Still owned by the queue (not acknowledged or permanently failed).
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Leased)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred work for one brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub brand_id: BrandId,
    pub job_type: JobType,
    /// Opaque argument, e.g. the id of a scheduled post to publish.
    #[serde(default)]
    pub payload: String,
    /// Failed attempts so far.
    pub retries: u32,
    pub status: JobStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Earliest instant the job may be leased.
    pub available_at: DateTime<Utc>,
    #[serde(default)]
    pub leased_until: Option<DateTime<Utc>>,
    /// Token of the current lease; `ack`/`fail` must present it.
    #[serde(default)]
    pub lease_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh pending job, leasable immediately.
    pub fn new(brand_id: BrandId, job_type: JobType, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            brand_id,
            job_type,
            payload: payload.into(),
            retries: 0,
            status: JobStatus::Pending,
            last_error: None,
            available_at: now,
            leased_until: None,
            lease_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Leased && self.leased_until.is_some_and(|until| until <= now)
    }

    pub(crate) fn lease(&mut self, now: DateTime<Utc>, lease_timeout: Duration) {
        self.status = JobStatus::Leased;
        self.leased_until = Some(after(now, lease_timeout));
        self.lease_id = Some(Uuid::now_v7());
        self.updated_at = now;
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.leased_until = None;
        self.lease_id = None;
        self.updated_at = now;
    }

    /// Record a failed attempt and apply `policy`.
    pub(crate) fn record_failure(
        &mut self,
        reason: impl Into<String>,
        retryable: bool,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailOutcome {
        self.retries = self.retries.saturating_add(1);
        self.last_error = Some(reason.into());
        self.leased_until = None;
        self.lease_id = None;
        self.updated_at = now;

        if retryable && policy.allows_retry(self.retries) {
            self.status = JobStatus::Pending;
            self.available_at = after(now, policy.delay_for_attempt(self.retries));
            FailOutcome::Retrying {
                retries: self.retries,
                available_at: self.available_at,
            }
        } else {
            self.status = JobStatus::Failed;
            FailOutcome::Failed {
                retries: self.retries,
            }
        }
    }
}

/// What the queue did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Pending again, leasable from `available_at`.
    Retrying {
        retries: u32,
        available_at: DateTime<Utc>,
    },
    /// Permanently failed.
    Failed { retries: u32 },
}

/// Retry ceiling plus exponential backoff between attempts.
///
/// A job is re-queued only while its failure count stays below
/// [`RetryPolicy::MAX_ATTEMPTS`]; the third failure is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure; doubles per further failure.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 3;

    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Retries take effect immediately (tests/dev).
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Whether a job that has failed `failures` times may run again.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < Self::MAX_ATTEMPTS
    }

    /// Delay before the next attempt after failure number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// `now + duration`, saturating at the largest representable instant.
pub(crate) fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn job() -> Job {
        Job::new(BrandId::parse("acme").unwrap(), JobType::Run, "")
    }

    #[test]
    fn job_type_keeps_unknown_strings() {
        assert_eq!(JobType::parse("Publish"), JobType::Publish);
        assert_eq!(JobType::parse("reindex"), JobType::Unknown("reindex".into()));

        let json = serde_json::to_string(&JobType::Unknown("reindex".into())).unwrap();
        assert_eq!(json, "\"reindex\"");
        let back: JobType = serde_json::from_str("\"sync\"").unwrap();
        assert_eq!(back, JobType::Sync);
    }

    #[test]
    fn third_failure_is_permanent() {
        let policy = RetryPolicy::immediate();
        let mut job = job();
        let now = Utc::now();

        assert!(matches!(job.record_failure("a", true, &policy, now), FailOutcome::Retrying { retries: 1, .. }));
        assert!(matches!(job.record_failure("b", true, &policy, now), FailOutcome::Retrying { retries: 2, .. }));
        assert_eq!(job.record_failure("c", true, &policy, now), FailOutcome::Failed { retries: 3 });
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("c"));
    }

    #[test]
    fn each_lease_gets_a_fresh_token() {
        let mut job = job();
        let now = Utc::now();

        job.lease(now, Duration::from_secs(60));
        let first = job.lease_id.unwrap();
        job.record_failure("x", true, &RetryPolicy::immediate(), now);
        assert_eq!(job.lease_id, None);

        job.lease(now, Duration::from_secs(60));
        assert_ne!(job.lease_id, Some(first));
        job.complete(now);
        assert_eq!(job.lease_id, None);
    }

    #[test]
    fn non_retryable_failure_is_permanent_at_once() {
        let mut job = job();
        let outcome = job.record_failure("unknown job type: x", false, &RetryPolicy::default(), Utc::now());
        assert_eq!(outcome, FailOutcome::Failed { retries: 1 });
    }

    #[test]
    fn retry_delays_job_by_backoff() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(25));
        let mut job = job();
        let now = Utc::now();
        job.record_failure("x", true, &policy, now);
        assert_eq!(job.available_at, now + chrono::Duration::seconds(10));
        assert!(!job.is_ready(now));

        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(25));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: backoff never decreases with attempts and never exceeds the cap.
        #[test]
        fn backoff_is_monotonic_and_capped(base_ms in 0u64..10_000, cap_ms in 0u64..100_000, attempt in 1u32..40) {
            let policy = RetryPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
            let d = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(d <= next);
            prop_assert!(next <= policy.max_delay);
        }
    }
}
