use quill_core::BrandId;
use quill_memory::{StoreError, VectorError};
use quill_tools::ToolError;

/// Failure while executing an agent action. Retryable from the queue's view.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("brand {0} has no topics configured")]
    NoTopics(BrandId),

    #[error("generated content duplicates {existing_id} (similarity {similarity:.3})")]
    Duplicate { existing_id: String, similarity: f32 },

    #[error("analytics sync failed for all {attempted} posts: {last_error}")]
    AnalyticsSync { attempted: usize, last_error: String },
}

/// Failure to build a brand's execution context. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("brand {0} not found")]
    BrandNotFound(BrandId),

    #[error("failed to load brand {brand_id}: {source}")]
    Store {
        brand_id: BrandId,
        #[source]
        source: StoreError,
    },

    #[error("failed to open vector index for brand {brand_id}: {source}")]
    Vector {
        brand_id: BrandId,
        #[source]
        source: VectorError,
    },
}
