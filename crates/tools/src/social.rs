//! Publishing to social platforms.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use quill_core::Post;

use crate::error::ToolError;
use crate::http;
use crate::resilient::Resilient;

/// What a platform reported back after accepting a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub platform: String,
    /// Platform-assigned identifier, when the platform returns one.
    pub social_id: Option<String>,
}

#[async_trait]
pub trait SocialClient: Send + Sync {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError>;
}

#[async_trait]
impl SocialClient for Resilient<dyn SocialClient> {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError> {
        self.invoke(|client| client.post(post)).await
    }
}

/// Platform label that fans a post out to every configured client.
pub const ALL_PLATFORMS: &str = "linkedin/x";

/// Routes each post to the client registered for its platform.
///
/// An empty platform (or [`ALL_PLATFORMS`]) publishes to every client; the
/// call fails if any of them fails.
#[derive(Default, Clone)]
pub struct MultiSocialClient {
    clients: BTreeMap<String, Arc<dyn SocialClient>>,
}

impl MultiSocialClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, platform: impl Into<String>, client: Arc<dyn SocialClient>) -> Self {
        self.add_client(platform, client);
        self
    }

    pub fn add_client(&mut self, platform: impl Into<String>, client: Arc<dyn SocialClient>) {
        self.clients.insert(platform.into().to_lowercase(), client);
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for MultiSocialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSocialClient")
            .field("platforms", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl SocialClient for MultiSocialClient {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError> {
        let platform = post.platform.trim().to_lowercase();
        if let Some(client) = self.clients.get(&platform) {
            return client.post(post).await;
        }

        if !platform.is_empty() && platform != ALL_PLATFORMS {
            return Err(ToolError::Unsupported(format!(
                "no client configured for platform: {}",
                post.platform
            )));
        }
        if self.clients.is_empty() {
            return Err(ToolError::Unsupported("no social clients configured".into()));
        }

        let mut receipts = Vec::new();
        let mut errors = Vec::new();
        for (name, client) in &self.clients {
            match client.post(post).await {
                Ok(receipt) => receipts.push(receipt),
                Err(err) => errors.push(format!("{name}: {err}")),
            }
        }

        if !errors.is_empty() {
            return Err(ToolError::failed(format!("multi-post failed: {}", errors.join("; "))));
        }

        Ok(PublishReceipt {
            platform: ALL_PLATFORMS.to_string(),
            social_id: receipts.into_iter().find_map(|r| r.social_id),
        })
    }
}

const LINKEDIN: &str = "linkedin";
pub(crate) const LINKEDIN_BASE: &str = "https://api.linkedin.com";

/// LinkedIn UGC posts API, posting as a member.
#[derive(Debug, Clone)]
pub struct LinkedInClient {
    access_token: String,
    author_urn: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UgcPostResponse {
    #[serde(default)]
    id: Option<String>,
}

impl LinkedInClient {
    pub fn new(access_token: impl Into<String>, author_urn: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            author_urn: author_urn.into(),
            base_url: LINKEDIN_BASE.to_string(),
            client: http::default_client(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = http::normalize_base(base_url);
        self
    }

    pub(crate) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl SocialClient for LinkedInClient {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError> {
        if self.access_token.is_empty() || self.author_urn.is_empty() {
            return Err(ToolError::config("linkedin access token and author urn are required"));
        }

        let payload = json!({
            "author": self.author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": post.content },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let request = self
            .client
            .post(format!("{}/v2/ugcPosts", self.base_url))
            .bearer_auth(&self.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&payload);

        let body = http::send(LINKEDIN, request).await?;
        // The id may also arrive only in a header; an unparsable body is not a failure.
        let social_id = serde_json::from_str::<UgcPostResponse>(&body)
            .ok()
            .and_then(|r| r.id);

        Ok(PublishReceipt {
            platform: LINKEDIN.to_string(),
            social_id,
        })
    }
}

const TWITTER: &str = "twitter";
pub(crate) const TWITTER_BASE: &str = "https://api.twitter.com";

/// X (Twitter) API v2 `POST /2/tweets`, authorized with an OAuth 2.0 user
/// access token carrying the `tweet.write` scope.
#[derive(Debug, Clone)]
pub struct TwitterClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

impl TwitterClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: TWITTER_BASE.to_string(),
            client: http::default_client(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = http::normalize_base(base_url);
        self
    }

    pub(crate) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl SocialClient for TwitterClient {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError> {
        if self.access_token.is_empty() {
            return Err(ToolError::config("twitter access token is required"));
        }

        let request = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&json!({ "text": post.content }));

        let created: TweetResponse = http::send_json(TWITTER, request).await?;
        Ok(PublishReceipt {
            platform: TWITTER.to_string(),
            social_id: Some(created.data.id),
        })
    }
}

/// Offline publisher that records what it was asked to post.
#[derive(Debug, Default)]
pub struct MockSocialClient {
    platform: String,
    fail_with: Option<String>,
    published: Mutex<Vec<Post>>,
    calls: AtomicUsize,
}

impl MockSocialClient {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Self::default()
        }
    }

    pub fn failing(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<Post> {
        match self.published.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialClient for MockSocialClient {
    async fn post(&self, post: &Post) -> Result<PublishReceipt, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ToolError::failed(message.clone()));
        }

        tracing::info!(platform = %self.platform, brand_id = %post.brand_id, post_id = %post.id, "mock publish");
        match self.published.lock() {
            Ok(mut guard) => guard.push(post.clone()),
            Err(poisoned) => poisoned.into_inner().push(post.clone()),
        }

        Ok(PublishReceipt {
            platform: self.platform.clone(),
            social_id: Some(format!("mock-{}-{}", self.platform, Uuid::now_v7().simple())),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use quill_core::BrandId;

    use super::*;

    fn post(platform: &str) -> Post {
        Post::draft(BrandId::parse("acme").unwrap(), "AI", "hello world", platform)
    }

    #[tokio::test]
    async fn routes_to_matching_platform_case_insensitively() {
        let linkedin = Arc::new(MockSocialClient::new("linkedin"));
        let twitter = Arc::new(MockSocialClient::new("twitter"));
        let multi = MultiSocialClient::new()
            .with_client("LinkedIn", linkedin.clone())
            .with_client("twitter", twitter.clone());

        let receipt = multi.post(&post("linkedin")).await.unwrap();

        assert_eq!(receipt.platform, "linkedin");
        assert_eq!(linkedin.calls(), 1);
        assert_eq!(twitter.calls(), 0);
    }

    #[tokio::test]
    async fn blank_platform_fans_out_and_aggregates_errors() {
        let ok = Arc::new(MockSocialClient::new("linkedin"));
        let broken = Arc::new(MockSocialClient::failing("twitter", "rate limited"));
        let multi = MultiSocialClient::new()
            .with_client("linkedin", ok.clone())
            .with_client("twitter", broken.clone());

        let err = multi.post(&post("")).await.unwrap_err();

        assert_eq!(ok.calls(), 1);
        assert_eq!(broken.calls(), 1);
        assert_eq!(err.to_string(), "multi-post failed: twitter: rate limited");
    }

    #[tokio::test]
    async fn unknown_platform_is_unsupported() {
        let multi = MultiSocialClient::new().with_client("linkedin", Arc::new(MockSocialClient::new("linkedin")));
        let err = multi.post(&post("myspace")).await.unwrap_err();
        assert!(matches!(err, ToolError::Unsupported(_)));
    }

    #[tokio::test]
    async fn twitter_creates_tweet_and_returns_its_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/2/tweets")
                .header("Authorization", "Bearer user-token")
                .json_body(serde_json::json!({ "text": "hello world" }));
            then.status(201)
                .json_body(serde_json::json!({ "data": { "id": "1790", "text": "hello world" } }));
        });

        let client = TwitterClient::new("user-token").with_base_url(server.base_url());
        let receipt = client.post(&post("twitter")).await.unwrap();

        mock.assert();
        assert_eq!(receipt.platform, "twitter");
        assert_eq!(receipt.social_id.as_deref(), Some("1790"));
    }

    #[tokio::test]
    async fn twitter_rejection_is_a_status_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/2/tweets");
            then.status(403).body("duplicate content");
        });

        let client = TwitterClient::new("user-token").with_base_url(server.base_url());
        let err = client.post(&post("twitter")).await.unwrap_err();

        assert!(matches!(err, ToolError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn linkedin_posts_ugc_and_returns_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v2/ugcPosts")
                .header("Authorization", "Bearer token")
                .header("X-Restli-Protocol-Version", "2.0.0")
                .body_contains("hello world");
            then.status(201).json_body(serde_json::json!({ "id": "urn:li:share:42" }));
        });

        let client = LinkedInClient::new("token", "urn:li:person:1").with_base_url(server.base_url());
        let receipt = client.post(&post("linkedin")).await.unwrap();

        mock.assert();
        assert_eq!(receipt.social_id.as_deref(), Some("urn:li:share:42"));
    }
}
