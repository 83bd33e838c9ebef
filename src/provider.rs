//! Upstream provider client.
//!
//! Assembles the provider payload for a prompt and issues the streaming or
//! non-streaming generation call. Non-2xx answers are turned into
//! [`Error::UpstreamRejected`] before any body is handed to the relay.

use std::time::Duration;

use axum::http::header;
use reqwest::Client;
use serde_json::Value;

use crate::config::{ApiKey, ProviderConfig};
use crate::error::{Error, Result};

/// Header carrying the provider API key.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for a Gemini-style `generateContent` API.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    name: String,
    base_url: String,
    api_key: Option<ApiKey>,
    default_model: String,
    timeout: Duration,
}

impl ProviderClient {
    /// Build a client with its own connection pool.
    ///
    /// No whole-request timeout is set on the pool since relayed streams
    /// may legitimately run for minutes; `timeout_secs` applies to
    /// non-streaming calls only.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }

    pub fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Request body for a single-turn user prompt.
    pub fn payload(prompt: &str) -> Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}]
            }]
        })
    }

    fn api_key(&self) -> Result<&ApiKey> {
        self.api_key.as_ref().ok_or_else(|| Error::MissingCredential {
            provider: self.name.clone(),
        })
    }

    /// Start a streaming generation and return the raw upstream response.
    pub async fn stream(&self, model: &str, prompt: &str) -> Result<reqwest::Response> {
        let api_key = self.api_key()?;
        let request = self
            .http
            .post(self.stream_url(model))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .header(API_KEY_HEADER, api_key.expose_secret())
            .json(&Self::payload(prompt));

        self.send(request, model).await
    }

    /// Run a non-streaming generation and return the parsed response body.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<Value> {
        let api_key = self.api_key()?;
        let request = self
            .http
            .post(self.generate_url(model))
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, api_key.expose_secret())
            .json(&Self::payload(prompt));

        let response = self.send(request, model).await?;
        response.json::<Value>().await.map_err(|e| {
            tracing::error!(error = %e, provider = %self.name, "Failed to parse provider response");
            Error::TransportInterrupted(format!("Failed to read provider response: {}", e))
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, model: &str) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, provider = %self.name, "Failed to reach provider");
            Error::TransportInterrupted(format!(
                "Failed to reach provider '{}': {}",
                self.name, e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = upstream_error_message(&body)
                .unwrap_or_else(|| format!("Provider returned {}", status));
            tracing::error!(
                status = %status,
                provider = %self.name,
                model = %model,
                body = %body,
                "Provider returned error"
            );
            return Err(Error::UpstreamRejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

/// Pull a human-readable message out of an upstream error body.
///
/// Prefers `error.message` from a JSON body, falls back to the raw text.
fn upstream_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_json = serde_json::from_str::<Value>(trimmed).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    Some(from_json.unwrap_or_else(|| trimmed.to_string()))
}
