use std::time::Duration;

use thiserror::Error;

/// Classified failure of a single provider call.
///
/// Only `Network`, `Timeout`, `Server` and `RateLimited` are worth retrying.
/// Of those, only the first three say anything about provider health and are
/// fed to the circuit breaker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider server error (status {status})")]
    Server { status: u16 },

    #[error("circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("provider rejected request (status {status})")]
    Client { status: u16 },

    #[error("provider returned code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout
                | ProviderError::Server { .. }
                | ProviderError::RateLimited { .. }
        )
    }

    /// Whether this outcome should count against the circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::Timeout | ProviderError::Server { .. }
        )
    }

    /// Provider-supplied delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a transport-level reqwest failure. The request URL carries
    /// the credentials, so it is stripped before the error is rendered.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() || e.is_body() {
            ProviderError::Decode(e.without_url().to_string())
        } else if e.is_connect() {
            ProviderError::Network("connection refused or unreachable".to_string())
        } else {
            ProviderError::Network(e.without_url().to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
