use std::time::Duration;

use crate::config::{invalid, parse_bool_var, parse_var};
use crate::errors::RelayError;

pub const BASE_URL_ENV: &str = "CHAT_RELAY_BASE_URL";
pub const MODEL_ENV: &str = "CHAT_RELAY_MODEL";
pub const TIMEOUT_SECS_ENV: &str = "CHAT_RELAY_TIMEOUT_SECS";
pub const UPSTREAM_STREAMING_ENV: &str = "CHAT_RELAY_UPSTREAM_STREAMING";

/// Configuration for the Gemini provider client.
///
/// API keys are not part of this config: they come from the credential pool,
/// one per attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct GeminiClientConfig {
    /// Base URL of the Generative Language API.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    pub model: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
    /// Use `streamGenerateContent` (SSE) instead of one complete payload.
    pub streaming: bool,
}

impl Default for GeminiClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClientConfig {
    /// Creates a config with sensible defaults.
    pub fn new() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout: Duration::from_secs(120),
            streaming: false,
        }
    }

    /// Builds a config from `CHAT_RELAY_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelayError> {
        let mut config = Self::new();
        if let Some(url) = parse_var::<String>(&lookup, BASE_URL_ENV)? {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(BASE_URL_ENV, "must be an http(s) URL"));
            }
            config.base_url = url;
        }
        if let Some(model) = parse_var::<String>(&lookup, MODEL_ENV)? {
            config.model = model;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, TIMEOUT_SECS_ENV)? {
            if secs == 0 {
                return Err(invalid(TIMEOUT_SECS_ENV, "must be at least 1"));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(streaming) = parse_bool_var(&lookup, UPSTREAM_STREAMING_ENV)? {
            config.streaming = streaming;
        }
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn model_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub(crate) fn generate_url(&self) -> String {
        format!("{}:generateContent", self.model_url())
    }

    pub(crate) fn stream_url(&self) -> String {
        format!("{}:streamGenerateContent?alt=sse", self.model_url())
    }
}
