use thiserror::Error;

use crate::chain::AttemptTrace;

/// Failure of a single provider call. Never escapes a resolver.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, DNS or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Payload failed validation or carried the provider's own failure marker.
    #[error("schema error: {0}")]
    Schema(String),

    /// Provider cannot serve this kind of query (e.g. needs a city name).
    #[error("unsupported query: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn schema(msg: impl Into<String>) -> Self {
        ProviderError::Schema(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Query strings carry API keys; never let them reach logs or traces.
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Schema(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Schema(err.to_string())
    }
}

/// Every provider of a chain was tried without success.
#[derive(Debug, Error)]
#[error("all {} weather providers failed", trace.len())]
pub struct AllProvidersFailed {
    pub trace: AttemptTrace,
}

/// Startup-fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "No usable weather provider configured.\n\
         Hint: run `geoweather configure qweather` or enable public providers."
    )]
    NoWeatherProvider,

    #[error("Invalid base URL '{url}' for provider '{provider}'")]
    InvalidBaseUrl { provider: String, url: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Provider '{0}' does not serve weather")]
    NotAWeatherProvider(&'static str),
}
