use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by [`super::FootballDataClient`].
///
/// Local admission failures (`RateLimitExhausted`) are kept apart from remote
/// rejections (`RateLimitRejected`) so callers can treat them differently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error(
        "local rate limit exhausted for {endpoint} after waiting {waited:?}{}",
        previous_attempt(.last_failure)
    )]
    RateLimitExhausted {
        endpoint: String,
        waited: Duration,
        /// Why the previous attempt failed, when this was a retry
        last_failure: Option<String>,
    },

    #[error("remote rate limit (429) for {endpoint}; backing off {backoff:?}")]
    RateLimitRejected { endpoint: String, backoff: Duration },

    #[error("authentication failed ({status}) for {endpoint}: invalid API key")]
    Authentication { endpoint: String, status: u16 },

    #[error("access forbidden ({status}) for {endpoint}")]
    Authorization { endpoint: String, status: u16 },

    #[error("resource not found (404): {endpoint}")]
    NotFound { endpoint: String },

    #[error("server error ({status}) for {endpoint} after {attempts} attempt(s)")]
    Server {
        endpoint: String,
        status: u16,
        attempts: u32,
    },

    #[error("request to {endpoint} failed after {attempts} attempt(s): {message}")]
    Transient {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    #[error("request to {endpoint} rejected ({status}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response from {endpoint} ({status}): {message}")]
    Decode {
        endpoint: String,
        status: u16,
        message: String,
    },
}

fn previous_attempt(last_failure: &Option<String>) -> String {
    last_failure
        .as_ref()
        .map(|f| format!(" (previous attempt: {})", f))
        .unwrap_or_default()
}

impl ApiError {
    pub fn endpoint(&self) -> &str {
        match self {
            ApiError::RateLimitExhausted { endpoint, .. }
            | ApiError::RateLimitRejected { endpoint, .. }
            | ApiError::Authentication { endpoint, .. }
            | ApiError::Authorization { endpoint, .. }
            | ApiError::NotFound { endpoint }
            | ApiError::Server { endpoint, .. }
            | ApiError::Transient { endpoint, .. }
            | ApiError::Rejected { endpoint, .. }
            | ApiError::Decode { endpoint, .. } => endpoint,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::RateLimitRejected { .. } => Some(429),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Authentication { status, .. }
            | ApiError::Authorization { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Rejected { status, .. }
            | ApiError::Decode { status, .. } => Some(*status),
            ApiError::RateLimitExhausted { .. } | ApiError::Transient { .. } => None,
        }
    }

    /// Whether the same call may succeed if simply tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimitExhausted { .. }
                | ApiError::RateLimitRejected { .. }
                | ApiError::Server { .. }
                | ApiError::Transient { .. }
        )
    }

    /// Credential problems stop the poller until it is reconfigured.
    pub fn halts_polling(&self) -> bool {
        matches!(
            self,
            ApiError::Authentication { .. } | ApiError::Authorization { .. }
        )
    }
}
