//! Error types for meterwatch-core.
//!
//! Every failed fetch is reported as a [`FetchError`], and every
//! `FetchError` maps to exactly one [`FailureKind`]. The kind decides what
//! the caller does next:
//!
//! | Kind | Strategy |
//! |------|----------|
//! | `AuthRejected` | Stop. The shared credential is no longer accepted. |
//! | `NetworkFailure` | Retry with backoff. |
//! | `RateLimited` | Retry with backoff, waiting at least `Retry-After`. |
//! | `MalformedResponse` | Skip the meter for this cycle. Do not retry. |

use std::time::Duration;

use thiserror::Error;

use meterwatch_types::{FailureKind, ParseError};

/// Errors that can occur when fetching data from the billing API.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The API refused the credential, or the credential was already
    /// marked rejected and no request was sent (`status` is `None`).
    #[error("Credential rejected{}", status_suffix(.status))]
    AuthRejected { status: Option<u16> },

    /// Connection, timeout, transport or server-side failure.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The API asked the client to slow down.
    #[error("Rate limited by API{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// The response could not be interpreted as a reading.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => " (not sent, context already rejected)".to_string(),
    }
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

impl FetchError {
    /// The failure kind this error belongs to.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::AuthRejected { .. } => FailureKind::AuthRejected,
            FetchError::NetworkFailure(_) => FailureKind::NetworkFailure,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::MalformedResponse(_) => FailureKind::MalformedResponse,
        }
    }

    /// Server-requested minimum delay, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the poller should retry this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<ParseError> for FetchError {
    fn from(err: ParseError) -> Self {
        FetchError::MalformedResponse(err.to_string())
    }
}

/// Result type alias using meterwatch-core's FetchError type.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors raised while constructing an [`ApiClient`](crate::ApiClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The base URL is not an http(s) URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A configured header name or value cannot be sent.
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    /// The underlying HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}
