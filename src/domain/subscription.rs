//! Subscription domain types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{MailId, SubscriptionId, UserId};

/// How often a subscription charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
    Weekly,
    Quarterly,
}

impl BillingCycle {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Weekly => "weekly",
            Self::Quarterly => "quarterly",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "weekly" => Some(Self::Weekly),
            "quarterly" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

/// Lifecycle state of a detected subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Paused,
}

impl SubscriptionStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// A detected recurring charge.
///
/// `(user_id, service_name, amount)` is unique; conflicting inserts are
/// silently suppressed, so a price change materialises as a new row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: SubscriptionId,
    /// Owning user.
    pub user_id: UserId,
    /// Mail row that evidenced this subscription, if known.
    pub mail_id: Option<MailId>,
    /// Service being paid for.
    pub service_name: String,
    /// Charge amount.
    pub amount: f64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Charge cadence.
    pub billing_cycle: BillingCycle,
    /// Next expected charge date, if the evidence stated one.
    pub next_billing_date: Option<NaiveDate>,
    /// Lifecycle state.
    pub status: SubscriptionStatus,
    /// Classifier confidence at detection time.
    pub confidence_score: f64,
    /// Whether the owner confirmed the detection.
    pub user_verified: bool,
    /// First detection instant.
    pub first_detected: DateTime<Utc>,
    /// Last update instant.
    pub last_updated: DateTime<Utc>,
    /// Optional category reference managed by the UI collaborator.
    pub category_id: Option<String>,
    /// Optional free-form notes.
    pub notes: Option<String>,
}
