//! `quill-tools`
//!
//! **Responsibility:** the external capabilities the agent depends on, each behind
//! an async trait with real (HTTP), backup and offline mock implementations.
//!
//! - [`search`]: trend research
//! - [`llm`]: text generation
//! - [`embedding`]: text embeddings
//! - [`social`]: publishing
//! - [`analytics`]: engagement metrics
//! - [`resilient`]: primary/backup failover over any of the above

pub mod analytics;
pub mod embedding;
pub mod error;
pub mod http;
pub mod llm;
pub mod resilient;
pub mod search;
pub mod social;

pub use analytics::{AnalyticsFetcher, LinkedInAnalytics, MockAnalytics, MultiAnalyticsFetcher, TwitterAnalytics};
pub use embedding::{EmbeddingTool, GeminiEmbedding, HashEmbedding};
pub use error::ToolError;
pub use llm::{GeminiClient, LlmTool, MockLlm};
pub use resilient::Resilient;
pub use search::{DuckDuckGoSearch, MockSearch, NewsApiSearch, NewsDataSearch, SearchTool};
pub use social::{LinkedInClient, MockSocialClient, MultiSocialClient, PublishReceipt, SocialClient, TwitterClient};
