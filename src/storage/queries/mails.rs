//! Mail row operations.
//!
//! Persistence is an upsert keyed on `(account_id, message_id)`: refetching
//! a message overwrites headers and bodies without duplicating the row,
//! which is what makes interrupted syncs safe to replay.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, AiProvider, FetchedMessage, MailId, MailRow};
use crate::storage::database::{Database, Result};

const MAIL_COLUMNS: &str = "id, account_id, message_id, subject, sender, body_text, body_html, \
     received_at, processed_at, is_subscription, subscription_confidence, extracted_data, \
     ai_provider, ai_reasoning, analysis_attempts";

/// Upserts a fetched message as a mail row.
pub async fn upsert(db: &Database, account_id: &AccountId, message: &FetchedMessage) -> Result<()> {
    let account_id = account_id.clone();
    let message = message.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO emails (id, account_id, message_id, subject, sender, body_text,
                                 body_html, received_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(account_id, message_id) DO UPDATE SET
                 subject = excluded.subject,
                 sender = excluded.sender,
                 body_text = excluded.body_text,
                 body_html = excluded.body_html,
                 received_at = excluded.received_at,
                 updated_at = excluded.updated_at",
            params![
                MailId::generate().0,
                account_id.0,
                message.message_id,
                message.subject,
                message.sender,
                message.body_text,
                message.body_html,
                message.received_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Counts rows not yet classified for an account.
pub async fn count_unprocessed(db: &Database, account_id: &AccountId) -> Result<i64> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE account_id = ?1 AND processed_at IS NULL",
            [&account_id.0],
            |row| row.get(0),
        )?)
    })
    .await
}

/// Selects the next batch of unclassified rows, newest first.
pub async fn batch_unprocessed(
    db: &Database,
    account_id: &AccountId,
    limit: u32,
) -> Result<Vec<MailRow>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MAIL_COLUMNS} FROM emails
             WHERE account_id = ?1 AND processed_at IS NULL
             ORDER BY received_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![account_id.0, limit], row_to_mail)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Writes a final classification verdict onto a row.
///
/// The transition to `processed_at != NULL` is a single statement, so a
/// row is never observable half-classified.
pub async fn mark_processed(
    db: &Database,
    mail_id: &MailId,
    is_subscription: bool,
    confidence: f64,
    extracted_data: Option<&serde_json::Value>,
    provider: AiProvider,
    reasoning: Option<&str>,
) -> Result<()> {
    let mail_id = mail_id.clone();
    let extracted_json = extracted_data.map(|v| v.to_string());
    let reasoning = reasoning.map(str::to_string);

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE emails
             SET processed_at = ?2, is_subscription = ?3, subscription_confidence = ?4,
                 extracted_data = ?5, ai_provider = ?6, ai_reasoning = ?7, updated_at = ?2
             WHERE id = ?1",
            params![
                mail_id.0,
                Utc::now().to_rfc3339(),
                is_subscription as i32,
                confidence,
                extracted_json,
                provider.as_str(),
                reasoning,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Increments a row's failed-attempt counter and returns the new count.
pub async fn bump_attempts(db: &Database, mail_id: &MailId) -> Result<i64> {
    let mail_id = mail_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE emails SET analysis_attempts = analysis_attempts + 1, updated_at = ?2
             WHERE id = ?1",
            params![mail_id.0, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.query_row(
            "SELECT analysis_attempts FROM emails WHERE id = ?1",
            [&mail_id.0],
            |row| row.get(0),
        )?)
    })
    .await
}

/// Counts all rows for an account.
pub async fn count_for_account(db: &Database, account_id: &AccountId) -> Result<i64> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE account_id = ?1",
            [&account_id.0],
            |row| row.get(0),
        )?)
    })
    .await
}

/// Looks a row up by its remote message ID.
pub async fn get_by_message_id(
    db: &Database,
    account_id: &AccountId,
    message_id: &str,
) -> Result<Option<MailRow>> {
    let account_id = account_id.clone();
    let message_id = message_id.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MAIL_COLUMNS} FROM emails WHERE account_id = ?1 AND message_id = ?2"
        ))?;
        let result = stmt
            .query_row(params![account_id.0, message_id], row_to_mail)
            .optional()?;
        Ok(result)
    })
    .await
}

fn row_to_mail(row: &Row<'_>) -> std::result::Result<MailRow, rusqlite::Error> {
    let received_at: String = row.get(7)?;
    let processed_at: Option<String> = row.get(8)?;
    let extracted_json: Option<String> = row.get(11)?;
    let provider: Option<String> = row.get(12)?;

    Ok(MailRow {
        id: MailId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        message_id: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        body_text: row.get(5)?,
        body_html: row.get(6)?,
        received_at: DateTime::parse_from_rfc3339(&received_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        processed_at: processed_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        is_subscription: row.get::<_, i32>(9)? != 0,
        subscription_confidence: row.get(10)?,
        extracted_data: extracted_json.and_then(|s| serde_json::from_str(&s).ok()),
        ai_provider: provider.as_deref().and_then(AiProvider::parse),
        ai_reasoning: row.get(13)?,
        analysis_attempts: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credential, CredentialId, MailAccount, ProcessingStatus, SyncStatus, UserId};
    use crate::storage::queries::{accounts, credentials};

    async fn setup() -> (Database, AccountId) {
        let db = Database::open_in_memory().await.unwrap();

        let credential = Credential {
            id: CredentialId::from("cred-1"),
            user_id: UserId::from("user-1"),
            client_id: "client".to_string(),
            client_secret_enc: "secret".to_string(),
            created_at: Utc::now(),
        };
        credentials::create(&db, &credential).await.unwrap();

        let account = MailAccount {
            id: AccountId::from("acct-1"),
            user_id: UserId::from("user-1"),
            credential_id: CredentialId::from("cred-1"),
            email: "person@example.com".to_string(),
            access_token_enc: "access".to_string(),
            refresh_token_enc: "refresh".to_string(),
            token_expiry: Utc::now(),
            is_active: true,
            sync_status: SyncStatus::Pending,
            processing_status: ProcessingStatus::Idle,
            total_emails: 0,
            processed_emails: 0,
            emails_to_analyze: 0,
            emails_analyzed: 0,
            subscriptions_found: 0,
            ai_cost_total: 0.0,
            is_initial_sync_complete: false,
            last_sync: None,
            last_page_token: None,
            last_processed_message_id: None,
            query_hash: None,
            processing_started_at: None,
            last_error: None,
        };
        accounts::create(&db, &account).await.unwrap();

        (db, account.id)
    }

    fn message(id: &str, subject: &str) -> FetchedMessage {
        FetchedMessage {
            message_id: id.to_string(),
            subject: Some(subject.to_string()),
            sender: "billing@example.com".to_string(),
            body_text: "body".to_string(),
            body_html: String::new(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_remote_id() {
        let (db, account_id) = setup().await;

        upsert(&db, &account_id, &message("m1", "First")).await.unwrap();
        upsert(&db, &account_id, &message("m1", "Replayed")).await.unwrap();

        assert_eq!(count_for_account(&db, &account_id).await.unwrap(), 1);

        let row = get_by_message_id(&db, &account_id, "m1").await.unwrap().unwrap();
        assert_eq!(row.subject.as_deref(), Some("Replayed"));
    }

    #[tokio::test]
    async fn batch_selects_unprocessed_newest_first() {
        let (db, account_id) = setup().await;

        let mut older = message("m1", "Older");
        older.received_at = Utc::now() - chrono::Duration::hours(2);
        upsert(&db, &account_id, &older).await.unwrap();
        upsert(&db, &account_id, &message("m2", "Newer")).await.unwrap();

        let batch = batch_unprocessed(&db, &account_id, 50).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message_id, "m2");
        assert_eq!(batch[1].message_id, "m1");
    }

    #[tokio::test]
    async fn mark_processed_removes_from_pool() {
        let (db, account_id) = setup().await;

        upsert(&db, &account_id, &message("m1", "Subject")).await.unwrap();
        let row = get_by_message_id(&db, &account_id, "m1").await.unwrap().unwrap();

        mark_processed(
            &db,
            &row.id,
            true,
            0.9,
            Some(&serde_json::json!({"service_name": "Netflix"})),
            AiProvider::Claude,
            Some("clear subscription receipt"),
        )
        .await
        .unwrap();

        assert_eq!(count_unprocessed(&db, &account_id).await.unwrap(), 0);

        let row = get_by_message_id(&db, &account_id, "m1").await.unwrap().unwrap();
        assert!(row.processed_at.is_some());
        assert!(row.is_subscription);
        assert_eq!(row.ai_provider, Some(AiProvider::Claude));
        assert_eq!(
            row.extracted_data.unwrap()["service_name"],
            serde_json::json!("Netflix")
        );
    }

    #[tokio::test]
    async fn bump_attempts_counts_up() {
        let (db, account_id) = setup().await;

        upsert(&db, &account_id, &message("m1", "Subject")).await.unwrap();
        let row = get_by_message_id(&db, &account_id, "m1").await.unwrap().unwrap();

        assert_eq!(bump_attempts(&db, &row.id).await.unwrap(), 1);
        assert_eq!(bump_attempts(&db, &row.id).await.unwrap(), 2);
        assert_eq!(bump_attempts(&db, &row.id).await.unwrap(), 3);
    }
}
