//! Brand, post and research records exchanged between the agent, the tools and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BrandId, PostId};

/// Per-brand configuration: identity, voice and publishing cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandProfile {
    pub id: BrandId,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub anti_topics: Vec<String>,
    /// Platforms this brand publishes to (e.g. `linkedin`, `twitter`). Empty means
    /// "every configured platform".
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default = "default_schedule_interval_hours")]
    pub schedule_interval_hours: u32,
}

fn default_schedule_interval_hours() -> u32 {
    24
}

impl BrandProfile {
    pub fn new(id: BrandId, name: impl Into<String>) -> Self {
        Self {
            id,
            user_id: String::new(),
            name: name.into(),
            industry: String::new(),
            voice: String::new(),
            target_audience: String::new(),
            topics: Vec::new(),
            anti_topics: Vec::new(),
            platforms: Vec::new(),
            schedule_interval_hours: default_schedule_interval_hours(),
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_anti_topics<I, S>(mut self, anti_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anti_topics = anti_topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    /// Platform used for single-target publishing (`""` routes to every client).
    pub fn primary_platform(&self) -> &str {
        self.platforms.first().map(String::as_str).unwrap_or("")
    }

    /// Whether `text` mentions any of the brand's excluded topics (case-insensitive).
    pub fn mentions_anti_topic(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.anti_topics
            .iter()
            .filter(|t| !t.trim().is_empty())
            .any(|t| haystack.contains(&t.trim().to_lowercase()))
    }
}

/// Lifecycle of a post or calendar entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    PendingReview,
    Approved,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::PendingReview => "pending_review",
            PostStatus::Approved => "approved",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(PostStatus::Draft),
            "pending_review" => Some(PostStatus::PendingReview),
            "approved" => Some(PostStatus::Approved),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

impl core::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement counters for a published post.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analytics {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
}

/// A post that went (or tried to go) out to a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub brand_id: BrandId,
    /// Identifier assigned by the social platform once published.
    #[serde(default)]
    pub social_id: Option<String>,
    pub topic: String,
    pub content: String,
    pub platform: String,
    pub status: PostStatus,
    #[serde(default)]
    pub analytics: Analytics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn draft(
        brand_id: BrandId,
        topic: impl Into<String>,
        content: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PostId::generate(),
            brand_id,
            social_id: None,
            topic: topic.into(),
            content: content.into(),
            platform: platform.into(),
            status: PostStatus::Draft,
            analytics: Analytics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }
}

/// A calendar entry awaiting approval and/or publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: PostId,
    pub brand_id: BrandId,
    pub topic: String,
    pub content: String,
    pub platform: String,
    pub status: PostStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledPost {
    /// Ready to publish: approved for the calendar and its slot has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at <= now
    }

    /// The history record created when this entry is published.
    pub fn to_post(&self) -> Post {
        let now = Utc::now();
        Post {
            id: self.id.clone(),
            brand_id: self.brand_id.clone(),
            social_id: None,
            topic: self.topic.clone(),
            content: self.content.clone(),
            platform: self.platform.clone(),
            status: PostStatus::Draft,
            analytics: Analytics::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A research hit used as generation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub query: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn brand() -> BrandProfile {
        BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme")
            .with_topics(["AI", "Cloud"])
            .with_anti_topics(["Politics", " "])
    }

    #[test]
    fn anti_topics_match_case_insensitively_and_skip_blanks() {
        let b = brand();
        assert!(b.mentions_anti_topic("Election POLITICS heats up"));
        assert!(!b.mentions_anti_topic("Serverless cloud costs"));
    }

    #[test]
    fn post_status_text_matches_serde() {
        for status in [PostStatus::PendingReview, PostStatus::Scheduled, PostStatus::Failed] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostStatus::parse("archived"), None);
    }

    #[test]
    fn scheduled_post_is_due_only_when_scheduled_and_past() {
        let now = Utc::now();
        let mut sp = ScheduledPost {
            id: PostId::parse("post-1").unwrap(),
            brand_id: BrandId::parse("acme").unwrap(),
            topic: "AI".into(),
            content: "hello".into(),
            platform: "linkedin".into(),
            status: PostStatus::Scheduled,
            scheduled_at: now - Duration::minutes(1),
            created_at: now,
            updated_at: now,
        };
        assert!(sp.is_due(now));

        sp.status = PostStatus::PendingReview;
        assert!(!sp.is_due(now));

        sp.status = PostStatus::Scheduled;
        sp.scheduled_at = now + Duration::hours(1);
        assert!(!sp.is_due(now));
    }

    #[test]
    fn brand_profile_fills_defaults_from_sparse_json() {
        let b: BrandProfile =
            serde_json::from_str(r#"{"id":"acme","name":"Acme","topics":["AI"]}"#).unwrap();
        assert_eq!(b.schedule_interval_hours, 24);
        assert_eq!(b.primary_platform(), "");
        assert_eq!(b.topics, vec!["AI".to_string()]);
    }
}
