//! `quill-scheduler`
//!
//! **Responsibility:** deferred, per-brand work. Jobs are enqueued (by the
//! [`planner`] or any external scheduler), leased by a polling [`worker`],
//! dispatched to the brand's agent and resolved as acknowledged, retried with
//! backoff, or permanently failed.
//!
//! - [`job`]: job model and retry policy
//! - [`queue`]: the lease-based queue trait, in-memory and Postgres backends
//! - [`worker`]: the polling loop and dispatch
//! - [`planner`]: recurring run/sync/publish jobs per brand
//! - [`config`]: layered configuration for the `quill-worker` binary
//! - [`runtime`]: provider wiring from configuration

pub mod config;
pub mod job;
pub mod planner;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use config::{BrandBackend, ConfigError, QueueBackend, QuillConfig};
pub use job::{FailOutcome, Job, JobStatus, JobType, RetryPolicy};
pub use planner::{JobPlanner, PlanReport, PlannerConfig, PlannerError, PlannerHandle};
#[cfg(feature = "postgres")]
pub use queue::PostgresJobQueue;
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueSettings, QueueStats};
pub use worker::{DispatchError, JobOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats};
