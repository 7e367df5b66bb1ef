//! Trend research.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use quill_core::Trend;

use crate::error::ToolError;
use crate::http;
use crate::resilient::Resilient;

#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError>;
}

#[async_trait]
impl SearchTool for Resilient<dyn SearchTool> {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError> {
        self.invoke(|tool| tool.search(query)).await
    }
}

const NEWSAPI: &str = "newsapi";
const NEWSAPI_BASE: &str = "https://newsapi.org";

/// NewsAPI `v2/everything`, newest first.
#[derive(Debug, Clone)]
pub struct NewsApiSearch {
    api_key: String,
    base_url: String,
    page_size: u8,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl NewsApiSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: NEWSAPI_BASE.to_string(),
            page_size: 5,
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
}

#[async_trait]
impl SearchTool for NewsApiSearch {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError> {
        if self.api_key.is_empty() {
            return Err(ToolError::config("newsapi key is required"));
        }

        let page_size = self.page_size.to_string();
        let request = self
            .client
            .get(format!("{}/v2/everything", self.base_url))
            .query(&[
                ("q", query),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("apiKey", self.api_key.as_str()),
            ]);

        let response: NewsApiResponse = http::send_json(NEWSAPI, request).await?;
        let now = Utc::now();

        Ok(response
            .articles
            .into_iter()
            .filter_map(|article| {
                let title = article.title.filter(|t| !t.trim().is_empty())?;
                Some(Trend {
                    query: query.to_string(),
                    title,
                    snippet: article.description.unwrap_or_default(),
                    url: article.url.unwrap_or_default(),
                    timestamp: now,
                })
            })
            .collect())
    }
}

const NEWSDATA: &str = "newsdata";
const NEWSDATA_BASE: &str = "https://newsdata.io";

/// NewsData.io `api/1/news`. Keys issued by NewsData start with `pub_`.
#[derive(Debug, Clone)]
pub struct NewsDataSearch {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct NewsDataResponse {
    #[serde(default)]
    results: Vec<NewsDataArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsDataArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

impl NewsDataSearch {
    pub const KEY_PREFIX: &'static str = "pub_";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: NEWSDATA_BASE.to_string(),
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

    pub fn accepts_key(api_key: &str) -> bool {
        api_key.starts_with(Self::KEY_PREFIX)
    }
}

#[async_trait]
impl SearchTool for NewsDataSearch {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError> {
        if self.api_key.is_empty() {
            return Err(ToolError::config("newsdata key is required"));
        }

        let request = self
            .client
            .get(format!("{}/api/1/news", self.base_url))
            .query(&[("apikey", self.api_key.as_str()), ("q", query), ("language", "en")]);

        let response: NewsDataResponse = http::send_json(NEWSDATA, request).await?;
        let now = Utc::now();

        Ok(response
            .results
            .into_iter()
            .filter_map(|article| {
                let title = article.title.filter(|t| !t.trim().is_empty())?;
                Some(Trend {
                    query: query.to_string(),
                    title,
                    snippet: article.description.unwrap_or_default(),
                    url: article.link.unwrap_or_default(),
                    timestamp: now,
                })
            })
            .take(5)
            .collect())
    }
}

const DUCKDUCKGO: &str = "duckduckgo";
const DUCKDUCKGO_BASE: &str = "https://html.duckduckgo.com";
const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Keyless web search over the DuckDuckGo HTML endpoint.
///
/// The result markup is not a stable API; a layout change yields an empty
/// result list rather than an error.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    base_url: String,
    max_results: usize,
    client: reqwest::Client,
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self {
            base_url: DUCKDUCKGO_BASE.to_string(),
            max_results: 5,
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
}

#[async_trait]
impl SearchTool for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError> {
        let request = self
            .client
            .post(format!("{}/html/", self.base_url))
            .header(reqwest::header::USER_AGENT, BROWSER_AGENT)
            .form(&[("q", query)]);

        let html = http::send(DUCKDUCKGO, request).await?;
        parse_duckduckgo(&html, query, self.max_results, Utc::now())
    }
}

fn markup_error(err: regex::Error) -> ToolError {
    ToolError::Decode {
        provider: DUCKDUCKGO,
        message: err.to_string(),
    }
}

/// Pull titles, links and snippets out of a DuckDuckGo result page.
fn parse_duckduckgo(html: &str, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<Trend>, ToolError> {
    let anchor = Regex::new(r#"(?s)<a\s([^>]*)>(.*?)</a>"#).map_err(markup_error)?;
    let href = Regex::new(r#"href="([^"]*)""#).map_err(markup_error)?;
    let tag = Regex::new(r"<[^>]+>").map_err(markup_error)?;

    let mut trends: Vec<Trend> = Vec::new();
    for caps in anchor.captures_iter(html) {
        let attrs = &caps[1];
        let text = decode_entities(tag.replace_all(&caps[2], "").trim());

        if attrs.contains("result__a") {
            if trends.len() == limit {
                break;
            }
            let link = href.captures(attrs).map(|h| resolve_link(&decode_entities(&h[1])));
            match link {
                Some(url) if !text.is_empty() && !url.is_empty() => trends.push(Trend {
                    query: query.to_string(),
                    title: text,
                    snippet: String::new(),
                    url,
                    timestamp: now,
                }),
                _ => {}
            }
        } else if attrs.contains("result__snippet") {
            if let Some(last) = trends.last_mut().filter(|t| t.snippet.is_empty()) {
                last.snippet = text;
            }
        }
    }
    Ok(trends)
}

/// Result links go through a `/l/?uddg=<target>` redirect; return the target.
fn resolve_link(raw: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    url::Url::parse(&absolute)
        .ok()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "uddg").map(|(_, v)| v.into_owned()))
        .unwrap_or(absolute)
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Offline search returning canned headlines for any query.
#[derive(Debug, Default)]
pub struct MockSearch {
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for MockSearch {
    async fn search(&self, query: &str) -> Result<Vec<Trend>, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ToolError::failed(message.clone()));
        }

        let now = Utc::now();
        Ok((1..=3)
            .map(|i| Trend {
                query: query.to_string(),
                title: format!("{query}: development #{i}"),
                snippet: format!("What practitioners are saying about {query} this week."),
                url: format!("https://example.com/{i}"),
                timestamp: now,
            })
            .collect())
    }
}
