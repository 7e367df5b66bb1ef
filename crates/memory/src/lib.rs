//! `quill-memory`
//!
//! **Responsibility:** everything the agent remembers between runs.
//!
//! - [`vector`]: per-brand embedding index with cosine top-K retrieval
//! - [`store`]: the brand repository (profiles, post history, content calendar)

pub mod store;
pub mod vector;

#[cfg(feature = "postgres")]
pub use store::PostgresBrandStore;
pub use store::{BrandStore, FileBrandStore, InMemoryBrandStore, StoreError};
pub use vector::{Metadata, SearchResult, VectorError, VectorIndex, VectorRecord, cosine_similarity};
