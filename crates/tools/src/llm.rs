//! Text generation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;
use crate::http;
use crate::resilient::Resilient;

#[async_trait]
pub trait LlmTool: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ToolError>;
}

#[async_trait]
impl LlmTool for Resilient<dyn LlmTool> {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ToolError> {
        self.invoke(|tool| tool.generate(system_prompt, user_prompt)).await
    }
}

pub(crate) const GEMINI: &str = "gemini";
pub(crate) const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Google Gemini `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: GEMINI_BASE.to_string(),
            client: http::default_client(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = http::normalize_base(base_url);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmTool for GeminiClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ToolError> {
        if self.api_key.is_empty() {
            return Err(ToolError::config("gemini api key is required"));
        }

        let body = GenerateRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: user_prompt }],
            }],
            system_instruction: (!system_prompt.is_empty()).then(|| GeminiContent {
                parts: vec![GeminiPart { text: system_prompt }],
            }),
        };

        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);

        let response: GenerateResponse = http::send_json(GEMINI, request).await?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ToolError::EmptyResponse(GEMINI))
    }
}

/// Offline generator.
///
/// Scripted replies are returned first (in order); after that every call yields
/// a short, unique draft.
#[derive(Debug, Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<String>>,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmTool for MockLlm {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ToolError::failed(message.clone()));
        }

        let scripted = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        if let Some(reply) = scripted {
            return Ok(reply);
        }

        let headline = user_prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("update");
        Ok(format!("{headline} [{}]", Uuid::now_v7().simple()))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn gemini_sends_system_instruction_and_reads_first_candidate() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-1.5-flash:generateContent")
                .query_param("key", "k")
                .json_body(json!({
                    "contents": [{ "parts": [{ "text": "write a post" }] }],
                    "system_instruction": { "parts": [{ "text": "be brief" }] }
                }));
            then.status(200).json_body(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Short post." }] } }]
            }));
        });

        let llm = GeminiClient::new("k").with_base_url(server.base_url());
        let text = llm.generate("be brief", "write a post").await.unwrap();

        mock.assert();
        assert_eq!(text, "Short post.");
    }

    #[tokio::test]
    async fn gemini_empty_candidates_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({ "candidates": [] }));
        });

        let llm = GeminiClient::new("k").with_base_url(server.base_url());
        let err = llm.generate("", "hi").await.unwrap_err();
        assert!(matches!(err, ToolError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn mock_llm_plays_script_then_generates() {
        let llm = MockLlm::scripted(["first"]);
        assert_eq!(llm.generate("", "topic").await.unwrap(), "first");

        let a = llm.generate("", "topic: AI").await.unwrap();
        let b = llm.generate("", "topic: AI").await.unwrap();
        assert!(a.starts_with("topic: AI"));
        assert_ne!(a, b);
        assert_eq!(llm.calls(), 3);
    }
}
