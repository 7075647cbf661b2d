//! Provider-side filter construction.
//!
//! Builds the single filter string a sync run scans under, from three
//! parts: a content disjunction (subject keywords and billing-sender
//! patterns), a date clause, and a fixed spam/trash exclusion. The
//! filter's fingerprint is stored on the account so a restart can tell
//! whether a saved resume cursor still belongs to the current policy.

use chrono::{DateTime, Months, Utc};
use sha2::{Digest, Sha256};

/// Subject keywords that mark likely subscription artifacts.
pub const SUBJECT_KEYWORDS: &[&str] = &[
    "subscription",
    "billing",
    "invoice",
    "receipt",
    "payment received",
    "payment confirmation",
    "payment successful",
    "renew",
    "renewal",
    "auto-pay",
    "autopay",
    "membership",
    "premium",
    "plan upgraded",
    "plan downgraded",
    "recurring charge",
    "monthly charge",
    "annual charge",
    "yearly charge",
    "charged",
    "statement",
    "payment method",
    "card ending",
    "trial ending",
    "trial ends",
    "cancel subscription",
];

/// Sender local-part patterns used by billing systems.
pub const SENDER_PATTERNS: &[&str] = &[
    "billing",
    "subscriptions",
    "payments",
    "invoices",
    "receipts",
    "finance",
    "accounts-payable",
    "membership",
];

/// A built filter with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailQuery {
    /// Provider filter expression.
    pub filter: String,
    /// First 16 hex characters of SHA-256 over the filter.
    pub fingerprint: String,
}

/// Builds the filter for an initial sync looking back `months_back`.
pub fn initial_query(now: DateTime<Utc>, months_back: u32) -> MailQuery {
    let after = now
        .checked_sub_months(Months::new(months_back))
        .unwrap_or(now);
    build(after)
}

/// Builds the filter for an incremental sync since `last_sync`.
pub fn incremental_query(last_sync: DateTime<Utc>) -> MailQuery {
    build(last_sync)
}

fn build(after: DateTime<Utc>) -> MailQuery {
    let mut clauses = Vec::with_capacity(SUBJECT_KEYWORDS.len() + SENDER_PATTERNS.len());

    for keyword in SUBJECT_KEYWORDS {
        if keyword.contains(' ') {
            clauses.push(format!("subject:\"{keyword}\""));
        } else {
            clauses.push(format!("subject:{keyword}"));
        }
    }
    for pattern in SENDER_PATTERNS {
        clauses.push(format!("from:{pattern}"));
    }

    let filter = format!(
        "({}) after:{} -in:spam -in:trash",
        clauses.join(" OR "),
        after.format("%Y/%m/%d"),
    );
    let fingerprint = fingerprint(&filter);

    MailQuery { filter, fingerprint }
}

/// First 16 hex characters of SHA-256 over the filter string.
pub fn fingerprint(filter: &str) -> String {
    let digest = Sha256::digest(filter.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}
