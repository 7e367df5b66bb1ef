use std::time::Duration;

/// Failure of an external capability.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Provider is not usable as configured (e.g. missing API key).
    #[error("{0}")]
    Config(String),

    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} api error {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an undecodable response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{capability} attempt timed out after {after:?}")]
    Timeout { capability: String, after: Duration },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
