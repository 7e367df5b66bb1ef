//! `quill-agent`
//!
//! **Responsibility:** the per-brand content agent that jobs execute against,
//! and the factory that builds its execution context.
//!
//! - [`agent`]: [`BrandAgent`] actions (run, sync analytics, plan, publish) and
//!   the [`ContentAgent`] implementation
//! - [`factory`]: resolves a brand id into a ready agent
//! - [`prompt`]: minimal prompt construction
//! - [`providers`]: the shared capability set wired into every agent

pub mod agent;
pub mod error;
pub mod factory;
pub mod prompt;
pub mod providers;

pub use agent::{AgentSettings, BrandAgent, ContentAgent, SyncReport};
pub use error::{AgentError, ContextError};
pub use factory::{AgentFactory, DefaultAgentFactory};
pub use providers::Providers;
