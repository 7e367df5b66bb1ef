//! Engagement metrics for published posts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use quill_core::{Analytics, Post};

use crate::error::ToolError;
use crate::http;
use crate::resilient::Resilient;
use crate::social::{LinkedInClient, TwitterClient};

#[async_trait]
pub trait AnalyticsFetcher: Send + Sync {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError>;
}

#[async_trait]
impl AnalyticsFetcher for Resilient<dyn AnalyticsFetcher> {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError> {
        self.invoke(|fetcher| fetcher.fetch(post)).await
    }
}

fn social_id(post: &Post) -> Result<&str, ToolError> {
    post.social_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ToolError::InvalidInput(format!("post {} has no social id", post.id)))
}

/// Dispatches to the fetcher registered for the post's platform.
#[derive(Default, Clone)]
pub struct MultiAnalyticsFetcher {
    fetchers: BTreeMap<String, Arc<dyn AnalyticsFetcher>>,
}

impl MultiAnalyticsFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetcher(mut self, platform: impl Into<String>, fetcher: Arc<dyn AnalyticsFetcher>) -> Self {
        self.fetchers.insert(platform.into().to_lowercase(), fetcher);
        self
    }
}

impl std::fmt::Debug for MultiAnalyticsFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAnalyticsFetcher")
            .field("platforms", &self.fetchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl AnalyticsFetcher for MultiAnalyticsFetcher {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError> {
        let platform = post.platform.trim().to_lowercase();
        match self.fetchers.get(&platform) {
            Some(fetcher) => fetcher.fetch(post).await,
            None => Err(ToolError::Unsupported(format!(
                "no fetcher for platform: {}",
                post.platform
            ))),
        }
    }
}

const LINKEDIN_ANALYTICS: &str = "linkedin analytics";

/// LinkedIn `socialActions` summary (likes and comments).
#[derive(Debug, Clone)]
pub struct LinkedInAnalytics {
    client: LinkedInClient,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialActions {
    #[serde(default)]
    likes_summary: LikesSummary,
    #[serde(default)]
    comments_summary: CommentsSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikesSummary {
    #[serde(default)]
    total_likes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsSummary {
    #[serde(default)]
    aggregated_total_comments: u64,
}

impl LinkedInAnalytics {
    pub fn new(client: LinkedInClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalyticsFetcher for LinkedInAnalytics {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError> {
        let social_id = social_id(post)?;
        let request = self
            .client
            .http()
            .get(format!("{}/v2/socialActions/{social_id}", self.client.base_url()))
            .bearer_auth(self.client.access_token());

        let actions: SocialActions = http::send_json(LINKEDIN_ANALYTICS, request).await?;
        Ok(Analytics {
            views: 0,
            likes: actions.likes_summary.total_likes,
            shares: 0,
            comments: actions.comments_summary.aggregated_total_comments,
        })
    }
}

const TWITTER_ANALYTICS: &str = "twitter analytics";

/// X API v2 `public_metrics` of one tweet. Retweets and quotes both count as
/// shares.
#[derive(Debug, Clone)]
pub struct TwitterAnalytics {
    client: TwitterClient,
}

#[derive(Debug, Deserialize)]
struct TweetLookup {
    data: TweetMetrics,
}

#[derive(Debug, Deserialize)]
struct TweetMetrics {
    #[serde(default)]
    public_metrics: PublicMetrics,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    quote_count: u64,
    /// Only reported on some API tiers.
    #[serde(default)]
    impression_count: u64,
}

impl TwitterAnalytics {
    pub fn new(client: TwitterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalyticsFetcher for TwitterAnalytics {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError> {
        let social_id = social_id(post)?;
        let request = self
            .client
            .http()
            .get(format!("{}/2/tweets/{social_id}", self.client.base_url()))
            .query(&[("tweet.fields", "public_metrics")])
            .bearer_auth(self.client.access_token());

        let lookup: TweetLookup = http::send_json(TWITTER_ANALYTICS, request).await?;
        let metrics = lookup.data.public_metrics;
        Ok(Analytics {
            views: metrics.impression_count,
            likes: metrics.like_count,
            shares: metrics.retweet_count + metrics.quote_count,
            comments: metrics.reply_count,
        })
    }
}

/// Offline fetcher returning fixed counters.
#[derive(Debug, Clone)]
pub struct MockAnalytics {
    analytics: Analytics,
    fail_with: Option<String>,
}

impl MockAnalytics {
    pub fn new(analytics: Analytics) -> Self {
        Self {
            analytics,
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            analytics: Analytics::default(),
            fail_with: Some(message.into()),
        }
    }
}

impl Default for MockAnalytics {
    fn default() -> Self {
        Self::new(Analytics {
            views: 100,
            likes: 10,
            shares: 2,
            comments: 1,
        })
    }
}

#[async_trait]
impl AnalyticsFetcher for MockAnalytics {
    async fn fetch(&self, post: &Post) -> Result<Analytics, ToolError> {
        social_id(post)?;
        match &self.fail_with {
            Some(message) => Err(ToolError::failed(message.clone())),
            None => Ok(self.analytics),
        }
    }
}
