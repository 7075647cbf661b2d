//! Credential storage operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Credential, CredentialId, UserId};
use crate::storage::database::{Database, DatabaseError, Result};

/// Inserts a new credential.
pub async fn create(db: &Database, credential: &Credential) -> Result<()> {
    let credential = credential.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "INSERT INTO credentials (id, user_id, client_id, client_secret_enc, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                credential.id.0,
                credential.user_id.0,
                credential.client_id,
                credential.client_secret_enc,
                credential.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a credential by ID.
pub async fn get(db: &Database, credential_id: &CredentialId) -> Result<Option<Credential>> {
    let credential_id = credential_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, client_id, client_secret_enc, created_at
             FROM credentials WHERE id = ?1",
        )?;
        let result = stmt
            .query_row([&credential_id.0], row_to_credential)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves a credential by ID, failing when it does not exist.
pub async fn get_required(db: &Database, credential_id: &CredentialId) -> Result<Credential> {
    get(db, credential_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("credential {credential_id}")))
}

fn row_to_credential(row: &Row<'_>) -> std::result::Result<Credential, rusqlite::Error> {
    let created_at: String = row.get(4)?;

    Ok(Credential {
        id: CredentialId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        client_id: row.get(2)?,
        client_secret_enc: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
