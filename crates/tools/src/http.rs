//! Shared HTTP plumbing for the provider clients.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ToolError;

/// Timeout applied when a provider is built without an explicit client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a `reqwest` client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("quill/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ToolError::Request {
            provider: "http client",
            source,
        })
}

pub(crate) fn default_client() -> reqwest::Client {
    build_client(DEFAULT_TIMEOUT).unwrap_or_default()
}

/// Send a prepared request and return the body of a 2xx response.
pub(crate) async fn send(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<String, ToolError> {
    let response = request
        .send()
        .await
        .map_err(|source| ToolError::Request { provider, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ToolError::Request { provider, source })?;

    if !status.is_success() {
        return Err(ToolError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Send a prepared request and decode a 2xx JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ToolError> {
    let body = send(provider, request).await?;
    serde_json::from_str(&body).map_err(|e| ToolError::Decode {
        provider,
        message: e.to_string(),
    })
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub(crate) fn normalize_base(url: impl Into<String>) -> String {
    let mut url = url.into();
    while url.ends_with('/') {
        url.pop();
    }
    url
}
