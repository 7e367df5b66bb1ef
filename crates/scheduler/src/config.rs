//! Layered configuration.
//!
//! Built-in defaults, then `quill.toml` (or an explicit file), then `QUILL_*`
//! environment variables. Nested keys use `__`, e.g.
//! `QUILL_PROVIDERS__GEMINI_API_KEY` or `QUILL_WORKER__POLL_INTERVAL_SECS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::job::RetryPolicy;
use crate::planner::PlannerConfig;
use crate::queue::QueueSettings;
use crate::worker::WorkerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "quill.toml";
pub const ENV_PREFIX: &str = "QUILL_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("providers.gemini_api_key is required unless providers.use_mock is set")]
    MissingGeminiKey,

    #[error("storage.database_url is required for postgres storage")]
    MissingDatabaseUrl,

    #[error("postgres storage needs quill-scheduler built with the `postgres` feature")]
    PostgresUnavailable,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub worker: WorkerSection,
    pub planner: PlannerSection,
    pub providers: ProviderSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub name: String,
    pub poll_interval_secs: u64,
    pub plan_batch_size: usize,
    pub lease_timeout_secs: u64,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            name: "quill-worker".to_string(),
            poll_interval_secs: 5,
            plan_batch_size: 5,
            lease_timeout_secs: 600,
            retry_base_secs: 30,
            retry_max_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// Run the recurring-job planner inside the worker process.
    pub enabled: bool,
    pub interval_secs: u64,
    pub sync_period_hours: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            sync_period_hours: 24,
        }
    }
}

/// External provider credentials. Absent optional credentials fall back to the
/// offline implementations.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Use offline providers for everything.
    pub use_mock: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    /// NewsAPI key, or a NewsData.io key (`pub_` prefix).
    pub news_api_key: Option<String>,
    pub linkedin_access_token: Option<String>,
    pub linkedin_author_urn: Option<String>,
    /// OAuth 2.0 user token with `tweet.read tweet.write users.read`.
    pub twitter_access_token: Option<String>,
    /// Bound on every outbound HTTP request.
    pub http_timeout_secs: u64,
    /// Optional bound per primary/backup attempt.
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            use_mock: false,
            gemini_api_key: None,
            gemini_model: None,
            news_api_key: None,
            linkedin_access_token: None,
            linkedin_author_urn: None,
            twitter_access_token: None,
            http_timeout_secs: 30,
            attempt_timeout_secs: None,
        }
    }
}

impl ProviderSection {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl std::fmt::Debug for ProviderSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSection")
            .field("use_mock", &self.use_mock)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_model", &self.gemini_model)
            .field("news_api_key", &self.news_api_key.as_ref().map(|_| "<redacted>"))
            .field("linkedin_access_token", &self.linkedin_access_token.as_ref().map(|_| "<redacted>"))
            .field("linkedin_author_urn", &self.linkedin_author_urn)
            .field("twitter_access_token", &self.twitter_access_token.as_ref().map(|_| "<redacted>"))
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Non-durable; jobs are lost on restart.
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrandBackend {
    /// JSON files under `data_dir`.
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Root of the per-brand JSON files and vector indexes. Vector indexes
    /// live here whichever brand backend is used.
    pub data_dir: PathBuf,
    pub queue: QueueBackend,
    pub brands: BrandBackend,
    pub database_url: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue: QueueBackend::Memory,
            brands: BrandBackend::File,
            database_url: None,
        }
    }
}

impl StorageSection {
    pub fn uses_postgres(&self) -> bool {
        self.queue == QueueBackend::Postgres || self.brands == BrandBackend::Postgres
    }
}

impl QuillConfig {
    /// Defaults, then the TOML file, then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(QuillConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate. An explicit `path` must exist; the default file is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: QuillConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("worker.poll_interval_secs"));
        }
        if self.worker.lease_timeout_secs == 0 {
            return Err(ConfigError::Zero("worker.lease_timeout_secs"));
        }
        if self.planner.enabled && self.planner.interval_secs == 0 {
            return Err(ConfigError::Zero("planner.interval_secs"));
        }
        if self.providers.http_timeout_secs == 0 {
            return Err(ConfigError::Zero("providers.http_timeout_secs"));
        }

        let has_gemini = self.providers.gemini_api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !self.providers.use_mock && !has_gemini {
            return Err(ConfigError::MissingGeminiKey);
        }

        if self.storage.uses_postgres() {
            if !cfg!(feature = "postgres") {
                return Err(ConfigError::PostgresUnavailable);
            }
            if self.storage.database_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                return Err(ConfigError::MissingDatabaseUrl);
            }
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            name: self.worker.name.clone(),
            poll_interval: Duration::from_secs(self.worker.poll_interval_secs),
            plan_batch_size: self.worker.plan_batch_size.max(1),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            lease_timeout: Duration::from_secs(self.worker.lease_timeout_secs),
            retry: RetryPolicy::new(
                Duration::from_secs(self.worker.retry_base_secs),
                Duration::from_secs(self.worker.retry_max_secs),
            ),
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            interval: Duration::from_secs(self.planner.interval_secs),
            sync_period: Duration::from_secs(self.planner.sync_period_hours.max(1) * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<QuillConfig, ConfigError> {
        QuillConfig::from_figment(Figment::from(Serialized::defaults(QuillConfig::default())).merge(Toml::string(toml)))
    }

    #[test]
    fn defaults_require_a_gemini_key() {
        assert!(matches!(from_toml(""), Err(ConfigError::MissingGeminiKey)));
    }

    #[test]
    fn mock_mode_needs_no_credentials() {
        let config = from_toml("[providers]\nuse_mock = true\n").unwrap();
        assert_eq!(config.worker.poll_interval_secs, 5);
        assert_eq!(config.worker_config().plan_batch_size, 5);
        assert_eq!(config.storage.queue, QueueBackend::Memory);
        assert_eq!(config.planner_config().sync_period, Duration::from_secs(86_400));
    }

    #[test]
    fn toml_overrides_sections() {
        let config = from_toml(
            r#"
            [worker]
            poll_interval_secs = 2
            retry_base_secs = 10
            retry_max_secs = 40

            [providers]
            gemini_api_key = "g-key"
            http_timeout_secs = 12
            attempt_timeout_secs = 20

            [storage]
            data_dir = "/var/lib/quill"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker_config().poll_interval, Duration::from_secs(2));
        let retry = config.queue_settings().retry;
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(40));
        assert_eq!(config.providers.http_timeout(), Duration::from_secs(12));
        assert_eq!(config.providers.attempt_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/quill"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = from_toml("[worker]\npoll_interval_secs = 0\n[providers]\nuse_mock = true\n").unwrap_err();
        assert_eq!(err.to_string(), "worker.poll_interval_secs must be greater than zero");
    }

    #[test]
    fn postgres_queue_needs_a_database_url() {
        let err = from_toml("[providers]\nuse_mock = true\n[storage]\nqueue = \"postgres\"\n").unwrap_err();
        if cfg!(feature = "postgres") {
            assert!(matches!(err, ConfigError::MissingDatabaseUrl));
        } else {
            assert!(matches!(err, ConfigError::PostgresUnavailable));
        }
    }

    #[test]
    fn postgres_brand_store_also_needs_a_database_url() {
        let err = from_toml("[providers]\nuse_mock = true\n[storage]\nbrands = \"postgres\"\n").unwrap_err();
        if cfg!(feature = "postgres") {
            assert!(matches!(err, ConfigError::MissingDatabaseUrl));
        } else {
            assert!(matches!(err, ConfigError::PostgresUnavailable));
        }

        let config = from_toml("[providers]\nuse_mock = true\n").unwrap();
        assert_eq!(config.storage.brands, BrandBackend::File);
        assert!(!config.storage.uses_postgres());
    }

    #[test]
    fn load_reads_an_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        std::fs::write(&path, "[providers]\nuse_mock = true\n[worker]\nname = \"edge\"\n").unwrap();

        let config = QuillConfig::load(Some(&path)).unwrap();
        assert_eq!(config.worker.name, "edge");

        let missing = dir.path().join("absent.toml");
        assert!(matches!(QuillConfig::load(Some(&missing)), Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut providers = ProviderSection::default();
        providers.gemini_api_key = Some("super-secret".into());
        providers.twitter_access_token = Some("tweet-secret".into());
        let rendered = format!("{providers:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("tweet-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
