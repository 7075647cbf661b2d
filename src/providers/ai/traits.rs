//! Language-model provider trait definition.
//!
//! The process runner escalates uncertain rows to an [`LmProvider`]. A
//! verdict carries the parsed classification, the model's reasoning, and
//! the token usage the cost accounting is based on.

use async_trait::async_trait;

use crate::domain::{Classification, MailRow};

/// Result type alias for language-model operations.
pub type Result<T> = std::result::Result<T, LmError>;

/// Errors that can occur during a language-model call.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    /// API key invalid or revoked. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Non-success HTTP status from the endpoint.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body or message.
        message: String,
    },

    /// Network failure or timeout.
    #[error("connection error: {0}")]
    Connection(String),

    /// The model's answer could not be parsed even after repair.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LmError {
    /// Whether the retry schedule applies to this failure.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => matches!(status, 500 | 503),
            _ => false,
        }
    }
}

/// A language-model verdict with its token usage.
#[derive(Debug, Clone)]
pub struct LmVerdict {
    /// The parsed classification.
    pub classification: Classification,
    /// The model's stated reasoning.
    pub reasoning: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Charge for this call in USD, 6 decimal places.
    pub cost: f64,
}

/// A language-model classifier over mail rows.
#[async_trait]
pub trait LmProvider: Send + Sync {
    /// Classifies one mail row.
    async fn classify(&self, mail: &MailRow) -> Result<LmVerdict>;
}
