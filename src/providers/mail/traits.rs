//! Mailbox provider trait definition.
//!
//! The sync runner drives a [`MailProvider`] one page at a time, passing a
//! bearer minted by the token broker for every call. Implementations do
//! not hold credentials.

use async_trait::async_trait;

use crate::domain::FetchedMessage;

/// Result type alias for mailbox provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur against the remote mailbox or token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Bearer invalid or revoked; the account must be reconnected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Provider quota exhausted.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else.
    #[error("provider error: {0}")]
    Internal(String),
}

/// One page of remote message IDs under a filter.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Remote message IDs in provider order.
    pub ids: Vec<String>,
    /// Cursor for the following page; absent on the last page.
    pub next_page_token: Option<String>,
}

/// A remote mailbox reachable with bearer authentication.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Lists one page of message IDs matching `filter`.
    async fn list_page(
        &self,
        bearer: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetches and normalises a single message by its remote ID.
    async fn fetch_message(&self, bearer: &str, message_id: &str) -> Result<FetchedMessage>;
}
