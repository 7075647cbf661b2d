//! Mail domain types.
//!
//! [`FetchedMessage`] is the normalised form a provider hands the sync
//! runner; [`MailRow`] is the persisted row the process runner classifies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, MailId};

/// Which classifier stage produced a mail row's final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    /// Keyword stage was confident enough on its own.
    Keywords,
    /// Language model was unavailable or failed; keyword result kept.
    KeywordsFallback,
    /// Language-model verdict.
    Claude,
    /// Classification failed repeatedly; row burned.
    Error,
}

impl AiProvider {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keywords => "keywords",
            Self::KeywordsFallback => "keywords_fallback",
            Self::Claude => "claude",
            Self::Error => "error",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keywords" => Some(Self::Keywords),
            "keywords_fallback" => Some(Self::KeywordsFallback),
            "claude" => Some(Self::Claude),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A message as fetched and normalised from the remote mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Remote message ID assigned by the provider.
    pub message_id: String,
    /// Subject header, if present.
    pub subject: Option<String>,
    /// Bare sender address (the bracketed form when present).
    pub sender: String,
    /// Decoded plain-text body. Empty when absent or undecodable.
    pub body_text: String,
    /// Decoded HTML body. Empty when absent or undecodable.
    pub body_html: String,
    /// Provider's internal receive timestamp.
    pub received_at: DateTime<Utc>,
}

/// A persisted mailbox message awaiting or carrying classification.
///
/// `(account_id, message_id)` is unique; re-fetching a message overwrites
/// headers and bodies but never duplicates the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailRow {
    /// Unique identifier for this row.
    pub id: MailId,
    /// Account the message belongs to.
    pub account_id: AccountId,
    /// Remote message ID assigned by the provider.
    pub message_id: String,
    /// Subject header, if present.
    pub subject: Option<String>,
    /// Bare sender address.
    pub sender: String,
    /// Decoded plain-text body.
    pub body_text: String,
    /// Decoded HTML body.
    pub body_html: String,
    /// Provider's internal receive timestamp.
    pub received_at: DateTime<Utc>,
    /// When classification finished. Null while unprocessed.
    pub processed_at: Option<DateTime<Utc>>,
    /// Final verdict: is this a subscription artifact.
    pub is_subscription: bool,
    /// Final confidence in [0, 1].
    pub subscription_confidence: f64,
    /// JSON of the candidate subscription fields extracted.
    pub extracted_data: Option<serde_json::Value>,
    /// Stage that produced the verdict.
    pub ai_provider: Option<AiProvider>,
    /// Free-text reasoning from the classifier.
    pub ai_reasoning: Option<String>,
    /// Failed classification attempts so far.
    pub analysis_attempts: i64,
}

impl MailRow {
    /// Text the keyword scorer runs over: subject, body and sender.
    pub fn searchable_text(&self) -> String {
        let mut text = String::new();
        if let Some(subject) = &self.subject {
            text.push_str(subject);
            text.push(' ');
        }
        text.push_str(&self.body_text);
        text.push(' ');
        text.push_str(&self.sender);
        text.to_lowercase()
    }
}
