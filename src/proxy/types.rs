//! Request and response bodies for the relay endpoints.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limiter::RateLimitStatus;

/// Approximate token budget for a single prompt.
pub const MAX_PROMPT_TOKENS: usize = 50_000;

/// Prompt length limit in characters (roughly four characters per token).
pub const MAX_PROMPT_CHARS: usize = MAX_PROMPT_TOKENS * 4;

static MODEL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("model id pattern is valid")
});

/// Body of `POST /v1/stream` and `POST /v1/generate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerateRequest {
    /// Reject requests that must not reach the provider.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("prompt must not be empty".to_string()));
        }

        let chars = self.prompt.chars().count();
        if chars > MAX_PROMPT_CHARS {
            return Err(Error::InvalidInput(format!(
                "prompt is {} characters, limit is {}",
                chars, MAX_PROMPT_CHARS
            )));
        }

        if let Some(model) = &self.model {
            if !MODEL_ID.is_match(model) {
                return Err(Error::InvalidInput(format!(
                    "invalid model identifier '{}'",
                    model
                )));
            }
        }

        Ok(())
    }

    /// The requested model, or `default` when none was given.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

/// Body of the rate-limit status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusBody {
    /// 1 when the caller is currently limited, 0 otherwise.
    pub limit: u8,
    pub remaining: usize,
    pub window_ms: u64,
    pub seconds_remaining: u64,
}

impl From<RateLimitStatus> for RateLimitStatusBody {
    fn from(status: RateLimitStatus) -> Self {
        Self {
            limit: u8::from(status.limited),
            remaining: status.remaining,
            window_ms: status.window.as_millis() as u64,
            seconds_remaining: status.retry_after_secs(),
        }
    }
}

/// Body returned by the non-streaming endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub text: String,
    pub fragments: Vec<String>,
}
