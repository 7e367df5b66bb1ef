//! Text embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::http;
use crate::llm::{GEMINI, GEMINI_BASE};
use crate::resilient::Resilient;

#[async_trait]
pub trait EmbeddingTool: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError>;
}

#[async_trait]
impl EmbeddingTool for Resilient<dyn EmbeddingTool> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
        self.invoke(|tool| tool.embed(text)).await
    }
}

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    #[serde(default)]
    values: Vec<f32>,
}

/// Google Gemini `embedContent`.
#[derive(Debug, Clone)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiEmbedding {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
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
}

#[async_trait]
impl EmbeddingTool for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
        if self.api_key.is_empty() {
            return Err(ToolError::config("gemini api key is required"));
        }

        let body = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
        };
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:embedContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);

        let response: EmbedResponse = http::send_json(GEMINI, request).await?;
        if response.embedding.values.is_empty() {
            return Err(ToolError::EmptyResponse(GEMINI));
        }
        Ok(response.embedding.values)
    }
}

/// Deterministic offline embedding (feature hashing over lowercase words).
///
/// Identical texts map to identical unit vectors; texts sharing no words are
/// orthogonal unless their words collide in a bucket.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedding {
    dim: usize,
}

impl HashEmbedding {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = fnv1a(&word.to_lowercase());
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingTool for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn hash_embedding_is_deterministic_and_normalized() {
        let e = HashEmbedding::default();
        let a = e.embed_sync("Rust makes systems programming fun");
        let b = e.embed_sync("rust MAKES systems, programming fun!");

        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(a.len(), HashEmbedding::DEFAULT_DIM);
    }

    #[test]
    fn hash_embedding_of_empty_text_is_zero() {
        let v = HashEmbedding::new(8).embed_sync("  ...  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn gemini_embedding_returns_values() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/text-embedding-004:embedContent")
                .query_param("key", "k")
                .json_body(json!({
                    "model": "models/text-embedding-004",
                    "content": { "parts": [{ "text": "hello" }] }
                }));
            then.status(200)
                .json_body(json!({ "embedding": { "values": [0.25, -0.5, 1.0] } }));
        });

        let embedder = GeminiEmbedding::new("k").with_base_url(server.base_url());
        let v = embedder.embed("hello").await.unwrap();

        mock.assert();
        assert_eq!(v, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn gemini_embedding_error_status_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(500).body("boom");
        });

        let embedder = GeminiEmbedding::new("k").with_base_url(server.base_url());
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, ToolError::Status { status: 500, .. }));
    }
}
