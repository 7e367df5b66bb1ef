//! `quill-core`: shared identifiers and domain records.
//!
//! This crate contains **pure data** (no IO): the brand/post model that the
//! scheduler, agent, tools and storage crates exchange.

pub mod error;
pub mod id;
pub mod model;

pub use error::DomainError;
pub use id::{BrandId, JobId, PostId};
pub use model::{Analytics, BrandProfile, Post, PostStatus, ScheduledPost, Trend};
