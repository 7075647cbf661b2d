//! SQL schema definitions as const strings.
//!
//! Contains the complete SQLite schema for the pipeline: accounts,
//! credentials, mail rows, and the subscription ledger.

/// SQL to create the credentials table.
pub const CREATE_CREDENTIALS: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    client_secret_enc TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the accounts table.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    credential_id TEXT NOT NULL REFERENCES credentials(id),
    email TEXT NOT NULL,
    access_token_enc TEXT NOT NULL,
    refresh_token_enc TEXT NOT NULL,
    token_expiry TEXT NOT NULL,
    is_active INTEGER DEFAULT 1,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    processing_status TEXT NOT NULL DEFAULT 'idle',
    total_emails INTEGER DEFAULT 0,
    processed_emails INTEGER DEFAULT 0,
    emails_to_analyze INTEGER DEFAULT 0,
    emails_analyzed INTEGER DEFAULT 0,
    subscriptions_found INTEGER DEFAULT 0,
    ai_cost_total REAL DEFAULT 0,
    is_initial_sync_complete INTEGER DEFAULT 0,
    last_sync TEXT,
    last_page_token TEXT,
    last_processed_message_id TEXT,
    query_hash TEXT,
    processing_started_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create account indexes.
pub const CREATE_ACCOUNT_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
CREATE INDEX IF NOT EXISTS idx_accounts_sync_status ON accounts(sync_status);
CREATE INDEX IF NOT EXISTS idx_accounts_processing_status ON accounts(processing_status)
"#;

/// SQL to create the emails table.
///
/// `(account_id, message_id)` is the idempotency key for re-fetches.
pub const CREATE_EMAILS: &str = r#"
CREATE TABLE IF NOT EXISTS emails (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    message_id TEXT NOT NULL,
    subject TEXT,
    sender TEXT NOT NULL,
    body_text TEXT NOT NULL DEFAULT '',
    body_html TEXT NOT NULL DEFAULT '',
    received_at TEXT NOT NULL,
    processed_at TEXT,
    is_subscription INTEGER DEFAULT 0,
    subscription_confidence REAL DEFAULT 0,
    extracted_data TEXT,
    ai_provider TEXT,
    ai_reasoning TEXT,
    analysis_attempts INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(account_id, message_id)
)
"#;

/// SQL to create email indexes.
pub const CREATE_EMAIL_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_emails_unprocessed ON emails(account_id, processed_at);
CREATE INDEX IF NOT EXISTS idx_emails_received ON emails(received_at DESC)
"#;

/// SQL to create the subscriptions table.
///
/// `(user_id, service_name, amount)` is the dedup key; conflicting
/// inserts are suppressed with INSERT OR IGNORE.
pub const CREATE_SUBSCRIPTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    mail_id TEXT REFERENCES emails(id) ON DELETE SET NULL,
    service_name TEXT NOT NULL,
    amount REAL NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USD',
    billing_cycle TEXT NOT NULL DEFAULT 'monthly',
    next_billing_date TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    confidence_score REAL DEFAULT 0,
    user_verified INTEGER DEFAULT 0,
    first_detected TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    category_id TEXT,
    notes TEXT,
    UNIQUE(user_id, service_name, amount)
)
"#;

/// SQL to create the subscriptions index.
pub const CREATE_SUBSCRIPTION_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id)
"#;

/// Returns all schema creation statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_CREDENTIALS,
        CREATE_ACCOUNTS,
        CREATE_ACCOUNT_INDEXES,
        CREATE_EMAILS,
        CREATE_EMAIL_INDEXES,
        CREATE_SUBSCRIPTIONS,
        CREATE_SUBSCRIPTION_INDEXES,
    ]
}
