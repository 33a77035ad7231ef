//! Error types for script generation.
//!
//! Errors are layered: [`ClientError`] describes one failed HTTP attempt,
//! [`GenerationError`] is what a caller of the orchestrator sees. Advisory
//! components (scoring, progress) have their own errors which are logged and
//! never propagated.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Failure of a single chat-completion attempt.
///
/// Every variant is retryable from the gateway's point of view; the retry
/// policy decides how long to wait before the next attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered 429.
    #[error("Rate limited (retry after {retry_after:?}): {message}")]
    RateLimited {
        /// Server-supplied wait, from the `Retry-After` header.
        retry_after: Option<Duration>,
        /// Response body.
        message: String,
    },

    /// Any other non-2xx status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status associated with the failure, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidResponse(_) => None,
        }
    }
}

/// Request-level errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Missing or unusable input (e.g. empty source text).
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The requested template is not registered.
    #[error("Unknown template '{name}'. Available templates: {}", .available.join(", "))]
    UnknownTemplate { name: String, available: Vec<String> },

    /// All attempts for one gateway call failed.
    #[error("Generation failed after {attempts} attempt(s): {message}")]
    GatewayExhausted { attempts: u32, message: String },

    /// Cancelled before any part produced output.
    #[error("Generation cancelled before any output was produced")]
    Cancelled,
}

impl GenerationError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Returns true if the error came from the caller's input rather than
    /// from the remote endpoint.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::UnknownTemplate { .. })
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Template '{name}' is invalid: {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Quality scoring failures. Always caught by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum ScoringError {
    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Scoring failed: {0}")]
    Other(String),
}

/// Progress sink failures. Always swallowed by the caller.
#[derive(Debug, Clone, Error)]
pub enum ProgressError {
    #[error("Progress receiver disconnected")]
    Disconnected,

    #[error("Progress sink error: {0}")]
    Other(String),
}
