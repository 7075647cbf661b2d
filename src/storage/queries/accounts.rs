//! Account CRUD and state-transition operations.
//!
//! Every status, counter, and cursor mutation the runners perform goes
//! through here. Cursor writes are transactional so a crash never leaves
//! a half-written resume point.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::domain::{
    AccountId, CredentialId, MailAccount, ProcessingStatus, SyncStatus, UserId,
};
use crate::storage::database::{Database, DatabaseError, Result};

const ACCOUNT_COLUMNS: &str = "id, user_id, credential_id, email, access_token_enc, \
     refresh_token_enc, token_expiry, is_active, sync_status, processing_status, \
     total_emails, processed_emails, emails_to_analyze, emails_analyzed, \
     subscriptions_found, ai_cost_total, is_initial_sync_complete, last_sync, \
     last_page_token, last_processed_message_id, query_hash, processing_started_at, \
     last_error";

/// Inserts a new account.
pub async fn create(db: &Database, account: &MailAccount) -> Result<()> {
    let account = account.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"
            ),
            params![
                account.id.0,
                account.user_id.0,
                account.credential_id.0,
                account.email,
                account.access_token_enc,
                account.refresh_token_enc,
                account.token_expiry.to_rfc3339(),
                account.is_active as i32,
                account.sync_status.as_str(),
                account.processing_status.as_str(),
                account.total_emails,
                account.processed_emails,
                account.emails_to_analyze,
                account.emails_analyzed,
                account.subscriptions_found,
                account.ai_cost_total,
                account.is_initial_sync_complete as i32,
                account.last_sync.map(|t| t.to_rfc3339()),
                account.last_page_token,
                account.last_processed_message_id,
                account.query_hash,
                account.processing_started_at.map(|t| t.to_rfc3339()),
                account.last_error,
                now,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves an account by ID.
pub async fn get(db: &Database, account_id: &AccountId) -> Result<Option<MailAccount>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"
        ))?;
        let result = stmt.query_row([&account_id.0], row_to_account).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves an account by ID, failing when it does not exist.
pub async fn get_required(db: &Database, account_id: &AccountId) -> Result<MailAccount> {
    get(db, account_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("account {account_id}")))
}

/// Lists all accounts owned by a user.
pub async fn list_for_user(db: &Database, user_id: &UserId) -> Result<Vec<MailAccount>> {
    let user_id = user_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 ORDER BY email"
        ))?;
        let rows = stmt.query_map([&user_id.0], row_to_account)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Deletes an account. Mail rows cascade with it.
pub async fn delete(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM accounts WHERE id = ?1", [&account_id.0])?;
        Ok(())
    })
    .await
}

/// Finds active accounts whose last run was interrupted mid-flight.
pub async fn find_interrupted(db: &Database) -> Result<Vec<MailAccount>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE is_active = 1
               AND (sync_status = 'syncing' OR processing_status = 'analyzing')"
        ))?;
        let rows = stmt.query_map([], row_to_account)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Marks a fresh sync run: status `syncing`, zeroed counters, new filter
/// fingerprint, run start stamped.
pub async fn begin_sync(db: &Database, account_id: &AccountId, query_hash: &str) -> Result<()> {
    let account_id = account_id.clone();
    let query_hash = query_hash.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts
             SET sync_status = 'syncing', total_emails = 0, processed_emails = 0,
                 last_page_token = NULL, last_processed_message_id = NULL,
                 query_hash = ?2, processing_started_at = ?3, last_error = NULL,
                 updated_at = ?3
             WHERE id = ?1",
            params![account_id.0, query_hash, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Marks a resumed sync run without touching counters or the cursor.
pub async fn resume_sync(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts SET sync_status = 'syncing', last_error = NULL, updated_at = ?2
             WHERE id = ?1",
            params![account_id.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Writes the counted total for the current filter.
pub async fn set_total_emails(db: &Database, account_id: &AccountId, total: i64) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts SET total_emails = ?2, updated_at = ?3 WHERE id = ?1",
            params![account_id.0, total, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Atomically advances the sync resume cursor after a drained page.
pub async fn write_sync_cursor(
    db: &Database,
    account_id: &AccountId,
    processed_emails: i64,
    next_page_token: Option<&str>,
    last_message_id: Option<&str>,
) -> Result<()> {
    let account_id = account_id.clone();
    let next_page_token = next_page_token.map(str::to_string);
    let last_message_id = last_message_id.map(str::to_string);

    db.transaction(move |tx| {
        tx.execute(
            "UPDATE accounts
             SET processed_emails = ?2, last_page_token = ?3,
                 last_processed_message_id = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                account_id.0,
                processed_emails,
                next_page_token,
                last_message_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Finalises a successful sync run.
pub async fn complete_sync(
    db: &Database,
    account_id: &AccountId,
    total_emails: i64,
    processed_emails: i64,
    was_initial: bool,
) -> Result<()> {
    let account_id = account_id.clone();

    db.transaction(move |tx| {
        tx.execute(
            "UPDATE accounts
             SET sync_status = 'completed', total_emails = ?2, processed_emails = ?3,
                 is_initial_sync_complete = CASE WHEN ?4 THEN 1 ELSE is_initial_sync_complete END,
                 last_sync = ?5, last_page_token = NULL, last_processed_message_id = NULL,
                 query_hash = NULL, processing_started_at = NULL, last_error = NULL,
                 updated_at = ?5
             WHERE id = ?1",
            params![
                account_id.0,
                total_emails,
                processed_emails,
                was_initial,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Records a failed sync run, optionally discarding the resume cursor.
pub async fn set_sync_error(
    db: &Database,
    account_id: &AccountId,
    message: &str,
    clear_resume: bool,
) -> Result<()> {
    let account_id = account_id.clone();
    let message = message.to_string();

    db.with_conn(move |conn| {
        if clear_resume {
            conn.execute(
                "UPDATE accounts
                 SET sync_status = 'error', last_error = ?2, last_page_token = NULL,
                     last_processed_message_id = NULL, query_hash = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![account_id.0, message, Utc::now().to_rfc3339()],
            )?;
        } else {
            conn.execute(
                "UPDATE accounts SET sync_status = 'error', last_error = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![account_id.0, message, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    })
    .await
}

/// Marks a fresh process run with the counted workload.
pub async fn begin_processing(
    db: &Database,
    account_id: &AccountId,
    emails_to_analyze: i64,
) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts
             SET processing_status = 'analyzing', emails_to_analyze = ?2,
                 emails_analyzed = 0, subscriptions_found = 0,
                 processing_started_at = ?3, last_error = NULL, updated_at = ?3
             WHERE id = ?1",
            params![account_id.0, emails_to_analyze, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Marks a resumed process run without rezeroing counters.
pub async fn resume_processing(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts
             SET processing_status = 'analyzing', last_error = NULL, updated_at = ?2
             WHERE id = ?1",
            params![account_id.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Advances the process-phase counters by one batch's totals.
///
/// `emails_analyzed` is clamped to `emails_to_analyze` so the invariant
/// holds even when rows re-enter the pool across resumed runs.
pub async fn advance_processing(
    db: &Database,
    account_id: &AccountId,
    analyzed_delta: i64,
    subscriptions_delta: i64,
) -> Result<()> {
    let account_id = account_id.clone();

    db.transaction(move |tx| {
        tx.execute(
            "UPDATE accounts
             SET emails_analyzed = MIN(emails_analyzed + ?2, emails_to_analyze),
                 subscriptions_found = subscriptions_found + ?3,
                 updated_at = ?4
             WHERE id = ?1",
            params![
                account_id.0,
                analyzed_delta,
                subscriptions_delta,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Adds a language-model charge to the account's running total.
pub async fn add_ai_cost(db: &Database, account_id: &AccountId, cost: f64) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts
             SET ai_cost_total = ROUND(ai_cost_total + ?2, 6), updated_at = ?3
             WHERE id = ?1",
            params![account_id.0, cost, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Finalises a successful process run.
pub async fn complete_processing(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts
             SET processing_status = 'completed', processing_started_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![account_id.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Records a failed process run, preserving all counters for resume.
pub async fn set_processing_error(
    db: &Database,
    account_id: &AccountId,
    message: &str,
) -> Result<()> {
    let account_id = account_id.clone();
    let message = message.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts SET processing_status = 'error', last_error = ?2, updated_at = ?3
             WHERE id = ?1",
            params![account_id.0, message, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Atomically writes a refreshed access token and its expiry.
pub async fn store_access_token(
    db: &Database,
    account_id: &AccountId,
    access_token_enc: &str,
    token_expiry: DateTime<Utc>,
) -> Result<()> {
    let account_id = account_id.clone();
    let access_token_enc = access_token_enc.to_string();

    db.transaction(move |tx| {
        tx.execute(
            "UPDATE accounts SET access_token_enc = ?2, token_expiry = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                account_id.0,
                access_token_enc,
                token_expiry.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Point-in-time progress snapshot for the polling hook.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub sync_status: SyncStatus,
    pub processing_status: ProcessingStatus,
    pub total_emails: i64,
    pub processed_emails: i64,
    pub emails_to_analyze: i64,
    pub emails_analyzed: i64,
    pub subscriptions_found: i64,
    pub ai_cost_total: f64,
    pub last_error: Option<String>,
}

/// Reads the counter set for an account.
pub async fn progress(db: &Database, account_id: &AccountId) -> Result<SyncProgress> {
    let account = get_required(db, account_id).await?;
    Ok(SyncProgress {
        sync_status: account.sync_status,
        processing_status: account.processing_status,
        total_emails: account.total_emails,
        processed_emails: account.processed_emails,
        emails_to_analyze: account.emails_to_analyze,
        emails_analyzed: account.emails_analyzed,
        subscriptions_found: account.subscriptions_found,
        ai_cost_total: account.ai_cost_total,
        last_error: account.last_error,
    })
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_account(row: &Row<'_>) -> std::result::Result<MailAccount, rusqlite::Error> {
    let token_expiry: String = row.get(6)?;
    let sync_status: String = row.get(8)?;
    let processing_status: String = row.get(9)?;

    Ok(MailAccount {
        id: AccountId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        credential_id: CredentialId(row.get(2)?),
        email: row.get(3)?,
        access_token_enc: row.get(4)?,
        refresh_token_enc: row.get(5)?,
        token_expiry: DateTime::parse_from_rfc3339(&token_expiry)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        is_active: row.get::<_, i32>(7)? != 0,
        sync_status: SyncStatus::parse(&sync_status).unwrap_or(SyncStatus::Pending),
        processing_status: ProcessingStatus::parse(&processing_status)
            .unwrap_or(ProcessingStatus::Idle),
        total_emails: row.get(10)?,
        processed_emails: row.get(11)?,
        emails_to_analyze: row.get(12)?,
        emails_analyzed: row.get(13)?,
        subscriptions_found: row.get(14)?,
        ai_cost_total: row.get(15)?,
        is_initial_sync_complete: row.get::<_, i32>(16)? != 0,
        last_sync: parse_ts(row.get(17)?),
        last_page_token: row.get(18)?,
        last_processed_message_id: row.get(19)?,
        query_hash: row.get(20)?,
        processing_started_at: parse_ts(row.get(21)?),
        last_error: row.get(22)?,
    })
}
