//! Sync-phase state machine.
//!
//! One run per account: decide whether to resume, count the messages
//! under the filter, fetch them page by page, and advance the durable
//! cursor after every drained page. The runner is built to die at any
//! point and pick up on the next start without refetching what the
//! cursor already covers.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::config::SyncSettings;
use crate::domain::{AccountId, MailAccount, SyncStatus};
use crate::providers::mail::{query, MailProvider, ProviderError};
use crate::services::token_broker::TokenBroker;
use crate::storage::queries::{accounts, mails};
use crate::storage::{Database, DatabaseError};

/// Sync failures, classified for resume handling and user messaging.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bearer invalid or revoked. The resume cursor is discarded.
    #[error("authentication: {0}")]
    Authentication(String),

    /// Provider quota exhausted. The resume cursor is preserved.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network failure or timeout. The resume cursor is preserved.
    #[error("network: {0}")]
    Network(String),

    /// Anything else. The resume cursor is preserved.
    #[error("sync failed: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Classifies a provider failure.
    ///
    /// Status-coded failures classify directly; free-text failures are
    /// sniffed for quota and network wording.
    pub fn classify(err: ProviderError) -> Self {
        match err {
            ProviderError::Authentication(msg) => Self::Authentication(msg),
            ProviderError::RateLimited { .. } => Self::RateLimited(err.to_string()),
            ProviderError::Connection(msg) => Self::Network(msg),
            ProviderError::NotFound(msg) => Self::Unknown(msg),
            ProviderError::Internal(msg) => {
                let lowered = msg.to_lowercase();
                if lowered.contains("quota") || lowered.contains("rate limit") {
                    Self::RateLimited(msg)
                } else if lowered.contains("fetch")
                    || lowered.contains("network")
                    || lowered.contains("timeout")
                    || lowered.contains("timed out")
                {
                    Self::Network(msg)
                } else {
                    Self::Unknown(msg)
                }
            }
        }
    }

    /// Whether this failure invalidates the stored resume cursor.
    pub fn clears_resume(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// User-visible message stored on the account.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Authentication(_) => {
                "Mailbox authorization expired. Please reconnect this account."
            }
            Self::RateLimited(_) => "Mailbox rate limit reached. Please retry later.",
            Self::Network(_) => "Network problem while syncing. Please retry.",
            Self::Unknown(_) => "Sync failed unexpectedly. Please retry.",
        }
    }
}

impl From<DatabaseError> for SyncError {
    fn from(err: DatabaseError) -> Self {
        Self::Unknown(err.to_string())
    }
}

/// Statistics from one completed sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Messages counted under the filter.
    pub total: i64,
    /// Messages fetched and persisted, including prior runs' progress.
    pub processed: i64,
    /// Per-message fetch failures skipped this run.
    pub skipped: i64,
    /// Whether the run picked up a stored cursor.
    pub resumed: bool,
}

/// Per-account sync driver.
pub struct SyncRunner {
    db: Database,
    mailbox: Arc<dyn MailProvider>,
    broker: Arc<TokenBroker>,
    settings: SyncSettings,
}

impl SyncRunner {
    /// Creates a runner over the given collaborators.
    pub fn new(
        db: Database,
        mailbox: Arc<dyn MailProvider>,
        broker: Arc<TokenBroker>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            db,
            mailbox,
            broker,
            settings,
        }
    }

    /// Runs one sync for the account, recording the outcome on it.
    ///
    /// On failure the account is left in `sync_status = error` with a
    /// user-visible message; the resume cursor survives unless the
    /// failure says otherwise.
    pub async fn run(&self, account_id: &AccountId) -> Result<SyncOutcome, SyncError> {
        let result = self.run_inner(account_id).await;

        if let Err(err) = &result {
            tracing::error!(account_id = %account_id, error = %err, "sync run failed");
            if let Err(write_err) = accounts::set_sync_error(
                &self.db,
                account_id,
                err.user_message(),
                err.clears_resume(),
            )
            .await
            {
                tracing::error!(
                    account_id = %account_id,
                    error = %write_err,
                    "failed to record sync error"
                );
            }
        }

        result
    }

    async fn run_inner(&self, account_id: &AccountId) -> Result<SyncOutcome, SyncError> {
        let account = accounts::get_required(&self.db, account_id).await?;

        let was_initial = !account.is_initial_sync_complete;
        let query = if was_initial {
            query::initial_query(Utc::now(), self.settings.months_back)
        } else {
            let last_sync = account.last_sync.ok_or_else(|| {
                SyncError::Unknown("incremental sync without a last_sync instant".to_string())
            })?;
            query::incremental_query(last_sync)
        };

        let resumed = account.sync_resumable(&query.fingerprint);
        self.log_resume_decision(&account, &query.fingerprint, resumed);

        let (start_token, start_processed, total) = if resumed {
            accounts::resume_sync(&self.db, account_id).await?;
            (
                account.last_page_token.clone(),
                account.processed_emails,
                account.total_emails,
            )
        } else {
            accounts::begin_sync(&self.db, account_id, &query.fingerprint).await?;

            let total = self.count_messages(account_id, &query.filter).await?;
            accounts::set_total_emails(&self.db, account_id, total).await?;
            tracing::info!(account_id = %account_id, total, "counted messages under filter");

            (None, 0, total)
        };

        let mut outcome = SyncOutcome {
            total,
            processed: start_processed,
            skipped: 0,
            resumed,
        };

        let mut page_token = start_token;
        loop {
            let bearer = self
                .broker
                .access_token(account_id)
                .await
                .map_err(SyncError::classify)?;

            let page = self
                .mailbox
                .list_page(
                    &bearer,
                    &query.filter,
                    self.settings.fetch_page_size,
                    page_token.as_deref(),
                )
                .await
                .map_err(SyncError::classify)?;

            let mut last_message_id = None;
            for message_id in &page.ids {
                let bearer = self
                    .broker
                    .access_token(account_id)
                    .await
                    .map_err(SyncError::classify)?;

                match self.mailbox.fetch_message(&bearer, message_id).await {
                    Ok(message) => {
                        mails::upsert(&self.db, account_id, &message).await?;
                        outcome.processed += 1;
                    }
                    Err(err) => {
                        // One bad message never fails the run.
                        outcome.skipped += 1;
                        tracing::warn!(
                            account_id = %account_id,
                            message_id = %message_id,
                            error = %err,
                            "skipping message after fetch failure"
                        );
                    }
                }
                last_message_id = Some(message_id.as_str());
            }

            self.save_cursor(
                account_id,
                outcome.processed,
                page.next_page_token.as_deref(),
                last_message_id,
            )
            .await;

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }

            tokio::time::sleep(self.settings.page_delay).await;
        }

        accounts::complete_sync(
            &self.db,
            account_id,
            outcome.total,
            outcome.processed,
            was_initial,
        )
        .await?;

        tracing::info!(
            account_id = %account_id,
            total = outcome.total,
            processed = outcome.processed,
            skipped = outcome.skipped,
            resumed = outcome.resumed,
            "sync completed"
        );

        Ok(outcome)
    }

    fn log_resume_decision(&self, account: &MailAccount, fingerprint: &str, resumed: bool) {
        if resumed {
            let stale = account
                .processing_started_at
                .map(|started| {
                    Utc::now() - started
                        > chrono::Duration::from_std(self.settings.stale_after)
                            .unwrap_or(chrono::Duration::zero())
                })
                .unwrap_or(false);
            if stale {
                tracing::warn!(
                    account_id = %account.id,
                    "resuming a stale sync run; cursor is still trusted"
                );
            }
            tracing::info!(
                account_id = %account.id,
                page_token = account.last_page_token.as_deref().unwrap_or_default(),
                processed = account.processed_emails,
                "resuming interrupted sync"
            );
        } else if matches!(account.sync_status, SyncStatus::Syncing | SyncStatus::Error)
            && account.query_hash.as_deref().is_some_and(|h| h != fingerprint)
        {
            tracing::info!(
                account_id = %account.id,
                "filter fingerprint changed; discarding resume state"
            );
        }
    }

    /// Iterates the filter purely to count IDs.
    async fn count_messages(&self, account_id: &AccountId, filter: &str) -> Result<i64, SyncError> {
        let mut total = 0i64;
        let mut page_token: Option<String> = None;

        loop {
            let bearer = self
                .broker
                .access_token(account_id)
                .await
                .map_err(SyncError::classify)?;

            let page = self
                .mailbox
                .list_page(
                    &bearer,
                    filter,
                    self.settings.count_page_size,
                    page_token.as_deref(),
                )
                .await
                .map_err(SyncError::classify)?;

            total += page.ids.len() as i64;

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(total),
            }
        }
    }

    /// Writes the resume cursor, retrying once.
    ///
    /// A second failure is logged and swallowed: losing one batch of
    /// progress on a crash is accepted, and later pages will advance the
    /// cursor again.
    async fn save_cursor(
        &self,
        account_id: &AccountId,
        processed: i64,
        next_page_token: Option<&str>,
        last_message_id: Option<&str>,
    ) {
        for attempt in 0..2 {
            match accounts::write_sync_cursor(
                &self.db,
                account_id,
                processed,
                next_page_token,
                last_message_id,
            )
            .await
            {
                Ok(()) => return,
                Err(err) if attempt == 0 => {
                    tracing::warn!(
                        account_id = %account_id,
                        error = %err,
                        "cursor write failed, retrying once"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        account_id = %account_id,
                        error = %err,
                        "cursor write failed twice; continuing without it"
                    );
                }
            }
        }
    }
}
