use std::sync::Arc;

use quill_tools::{
    AnalyticsFetcher, EmbeddingTool, HashEmbedding, LlmTool, MockAnalytics, MockLlm, MockSearch,
    MockSocialClient, SearchTool, SocialClient,
};

/// Capabilities shared by every brand agent in the process.
///
/// Usually each slot holds a `Resilient<dyn Trait>` pair.
#[derive(Clone)]
pub struct Providers {
    pub search: Arc<dyn SearchTool>,
    pub llm: Arc<dyn LlmTool>,
    pub embedding: Arc<dyn EmbeddingTool>,
    pub social: Arc<dyn SocialClient>,
    pub analytics: Arc<dyn AnalyticsFetcher>,
}

impl Providers {
    /// Fully offline set: canned search, generated text, hashed embeddings,
    /// a publisher that accepts any platform and fixed analytics.
    pub fn mock() -> Self {
        Self {
            search: Arc::new(MockSearch::new()),
            llm: Arc::new(MockLlm::new()),
            embedding: Arc::new(HashEmbedding::default()),
            social: Arc::new(MockSocialClient::new("mock")),
            analytics: Arc::new(MockAnalytics::default()),
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
