//! Account domain types.
//!
//! A [`MailAccount`] is a bound mailbox created after a successful OAuth
//! exchange. It carries the encrypted token pair, the per-phase status
//! fields, the progress counters, and the durable resume cursor that the
//! sync and process runners advance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, CredentialId, UserId};

/// Sync-phase status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never synced.
    Pending,
    /// A sync run is (or was, before a crash) in flight.
    Syncing,
    /// Last sync finished cleanly.
    Completed,
    /// Last sync failed; see `last_error`.
    Error,
}

impl SyncStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Process-phase status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// No processing run has started since the last sync.
    Idle,
    /// A process run is (or was, before a crash) in flight.
    Analyzing,
    /// Last process run finished cleanly.
    Completed,
    /// Last process run failed; see `last_error`.
    Error,
}

impl ProcessingStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "analyzing" => Some(Self::Analyzing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A bound mailbox account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAccount {
    /// Unique identifier for this account.
    pub id: AccountId,
    /// Owning user.
    pub user_id: UserId,
    /// OAuth client credential used to mint bearers.
    pub credential_id: CredentialId,
    /// Mailbox address.
    pub email: String,
    /// Encrypted OAuth access token.
    pub access_token_enc: String,
    /// Encrypted OAuth refresh token.
    pub refresh_token_enc: String,
    /// Instant the access token expires.
    pub token_expiry: DateTime<Utc>,
    /// Whether the account participates in sync.
    pub is_active: bool,
    /// Sync-phase status.
    pub sync_status: SyncStatus,
    /// Process-phase status.
    pub processing_status: ProcessingStatus,
    /// Total message count under the current filter, once counted.
    pub total_emails: i64,
    /// Messages fetched and persisted so far.
    pub processed_emails: i64,
    /// Unprocessed rows counted at the start of the process run.
    pub emails_to_analyze: i64,
    /// Rows classified so far in the process run.
    pub emails_analyzed: i64,
    /// Subscriptions created by the process run.
    pub subscriptions_found: i64,
    /// Cumulative language-model spend in USD, 6 decimal places.
    pub ai_cost_total: f64,
    /// Whether the initial lookback sync has completed at least once.
    pub is_initial_sync_complete: bool,
    /// Completion instant of the last successful sync.
    pub last_sync: Option<DateTime<Utc>>,
    /// Resume cursor: provider page token of the next unfetched page.
    pub last_page_token: Option<String>,
    /// Resume cursor: last remote message ID persisted.
    pub last_processed_message_id: Option<String>,
    /// Fingerprint of the filter the resume cursor belongs to.
    pub query_hash: Option<String>,
    /// Start instant of the in-flight run, for staleness logging.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// User-visible message from the last failed run.
    pub last_error: Option<String>,
}

impl MailAccount {
    /// Whether an interrupted sync can pick up where it stopped.
    ///
    /// Covers both a crashed run (status still `syncing`) and a run that
    /// failed with its cursor preserved (status `error`). The cursor is
    /// only trusted when it left a page token behind and was built
    /// against the same filter fingerprint.
    pub fn sync_resumable(&self, fingerprint: &str) -> bool {
        matches!(self.sync_status, SyncStatus::Syncing | SyncStatus::Error)
            && self.last_page_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.query_hash.as_deref() == Some(fingerprint)
    }
}

/// A stored OAuth client secret used to mint bearers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Unique identifier.
    pub id: CredentialId,
    /// Owning user.
    pub user_id: UserId,
    /// OAuth client ID (not secret; stored in the clear).
    pub client_id: String,
    /// Encrypted OAuth client secret.
    pub client_secret_enc: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}
