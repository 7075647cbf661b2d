//! Process-phase state machine.
//!
//! Batches unclassified mail rows for an account through the hybrid
//! classifier: the keyword stage decides cheap rejections outright and
//! escalates everything else to the language model when one is
//! configured. Verdicts are written onto the rows; verdicts that name a
//! service and an amount are materialised into the subscription ledger.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::classifier;
use crate::config::ProcessingSettings;
use crate::domain::{
    AccountId, AiProvider, Classification, MailAccount, MailRow, ProcessingStatus, Subscription,
    SubscriptionId, SubscriptionStatus,
};
use crate::providers::ai::{LmError, LmProvider};
use crate::storage::queries::{accounts, mails, subscriptions};
use crate::storage::{Database, DatabaseError};

/// A failure that aborts the whole process run.
///
/// Per-row failures are budgeted (three attempts, then the row is
/// burned); only storage failures outside a row's scope land here.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("storage: {0}")]
    Database(#[from] DatabaseError),
}

/// A failure scoped to a single row, charged against its attempt budget.
#[derive(Debug, Error)]
enum RowError {
    #[error("language model: {0}")]
    Lm(String),

    #[error("storage: {0}")]
    Database(#[from] DatabaseError),
}

/// Statistics from one completed process run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Rows classified this run.
    pub analyzed: i64,
    /// Subscriptions created this run.
    pub subscriptions_found: i64,
}

/// Per-account classification driver.
pub struct ProcessRunner {
    db: Database,
    lm: Option<Arc<dyn LmProvider>>,
    settings: ProcessingSettings,
}

impl ProcessRunner {
    /// Creates a runner. `lm` is `None` when no API key is configured;
    /// every escalation then falls back to the keyword verdict.
    pub fn new(
        db: Database,
        lm: Option<Arc<dyn LmProvider>>,
        settings: ProcessingSettings,
    ) -> Self {
        Self { db, lm, settings }
    }

    /// Runs one processing pass for the account.
    ///
    /// On failure the account is left in `processing_status = error` with
    /// every counter intact, so the next start resumes instead of
    /// recounting.
    pub async fn run(&self, account_id: &AccountId) -> Result<ProcessOutcome, ProcessError> {
        let result = self.run_inner(account_id).await;

        if let Err(err) = &result {
            tracing::error!(account_id = %account_id, error = %err, "process run failed");
            if let Err(write_err) =
                accounts::set_processing_error(&self.db, account_id, "Analysis failed. Please retry.")
                    .await
            {
                tracing::error!(
                    account_id = %account_id,
                    error = %write_err,
                    "failed to record processing error"
                );
            }
        }

        result
    }

    async fn run_inner(&self, account_id: &AccountId) -> Result<ProcessOutcome, ProcessError> {
        let account = accounts::get_required(&self.db, account_id).await?;

        let resumable = matches!(
            account.processing_status,
            ProcessingStatus::Analyzing | ProcessingStatus::Error
        ) && account.emails_analyzed < account.emails_to_analyze;

        if resumable {
            tracing::info!(
                account_id = %account_id,
                analyzed = account.emails_analyzed,
                to_analyze = account.emails_to_analyze,
                "resuming interrupted processing"
            );
            self.log_stale(&account);
            accounts::resume_processing(&self.db, account_id).await?;
        } else {
            let unprocessed = mails::count_unprocessed(&self.db, account_id).await?;
            if unprocessed == 0 {
                accounts::begin_processing(&self.db, account_id, 0).await?;
                accounts::complete_processing(&self.db, account_id).await?;
                tracing::info!(account_id = %account_id, "nothing to analyze");
                return Ok(ProcessOutcome::default());
            }
            accounts::begin_processing(&self.db, account_id, unprocessed).await?;
            tracing::info!(account_id = %account_id, unprocessed, "starting processing");
        }

        let mut outcome = ProcessOutcome::default();

        loop {
            let batch =
                mails::batch_unprocessed(&self.db, account_id, self.settings.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let mut batch_analyzed = 0i64;
            let mut batch_subscriptions = 0i64;

            for row in &batch {
                match self.process_row(&account, row).await {
                    Ok(created) => {
                        batch_analyzed += 1;
                        if created {
                            batch_subscriptions += 1;
                        }
                    }
                    Err(err) => {
                        let attempts = mails::bump_attempts(&self.db, &row.id).await?;
                        tracing::warn!(
                            account_id = %account_id,
                            mail_id = %row.id,
                            attempts,
                            error = %err,
                            "row classification failed"
                        );
                        if attempts >= self.settings.max_analysis_attempts {
                            // Budget consumed: burn the row so it stops
                            // re-entering the pool.
                            mails::mark_processed(
                                &self.db,
                                &row.id,
                                false,
                                0.0,
                                None,
                                AiProvider::Error,
                                Some(&format!("analysis failed after {attempts} attempts: {err}")),
                            )
                            .await?;
                            batch_analyzed += 1;
                        }
                    }
                }
            }

            accounts::advance_processing(&self.db, account_id, batch_analyzed, batch_subscriptions)
                .await?;
            outcome.analyzed += batch_analyzed;
            outcome.subscriptions_found += batch_subscriptions;

            tokio::time::sleep(self.settings.batch_delay).await;
        }

        accounts::complete_processing(&self.db, account_id).await?;

        tracing::info!(
            account_id = %account_id,
            analyzed = outcome.analyzed,
            subscriptions = outcome.subscriptions_found,
            "processing completed"
        );

        Ok(outcome)
    }

    /// Classifies one row and persists the verdict. Returns whether a
    /// subscription row was created.
    async fn process_row(
        &self,
        account: &MailAccount,
        row: &MailRow,
    ) -> Result<bool, RowError> {
        let keyword = classifier::classify(row);

        let (verdict, provider, reasoning, cost) =
            if keyword.classification.confidence < self.settings.keyword_confidence_threshold {
                // Confident cheap rejection; the paid stage is not consulted.
                (
                    keyword.classification.clone(),
                    AiProvider::Keywords,
                    keyword.reasoning(),
                    0.0,
                )
            } else if let Some(lm) = &self.lm {
                match lm.classify(row).await {
                    Ok(lm_verdict) => (
                        lm_verdict.classification,
                        AiProvider::Claude,
                        lm_verdict.reasoning,
                        lm_verdict.cost,
                    ),
                    // An unparseable answer is a row failure: it burns one
                    // of the row's three attempts.
                    Err(LmError::InvalidResponse(msg)) => return Err(RowError::Lm(msg)),
                    Err(err) => {
                        tracing::warn!(
                            mail_id = %row.id,
                            error = %err,
                            "language model unavailable, keeping keyword verdict"
                        );
                        (
                            keyword.classification.clone(),
                            AiProvider::KeywordsFallback,
                            keyword.reasoning(),
                            0.0,
                        )
                    }
                }
            } else {
                (
                    keyword.classification.clone(),
                    AiProvider::KeywordsFallback,
                    keyword.reasoning(),
                    0.0,
                )
            };

        let extracted = serde_json::to_value(&verdict).ok();

        mails::mark_processed(
            &self.db,
            &row.id,
            verdict.is_subscription,
            verdict.confidence,
            extracted.as_ref(),
            provider,
            Some(&reasoning),
        )
        .await?;

        if cost > 0.0 {
            accounts::add_ai_cost(&self.db, &account.id, cost).await?;
        }

        if verdict.has_subscription_fields()
            && verdict.confidence >= self.settings.subscription_min_confidence
        {
            let created = subscriptions::upsert_ignore(
                &self.db,
                &Self::subscription_from(account, row, &verdict),
            )
            .await?;
            return Ok(created);
        }

        Ok(false)
    }

    fn subscription_from(
        account: &MailAccount,
        row: &MailRow,
        verdict: &Classification,
    ) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: SubscriptionId::generate(),
            user_id: account.user_id.clone(),
            mail_id: Some(row.id.clone()),
            // has_subscription_fields() guarantees both are present.
            service_name: verdict.service_name.clone().unwrap_or_default(),
            amount: verdict.amount.unwrap_or_default(),
            currency: verdict.currency.clone().unwrap_or_else(|| "USD".to_string()),
            billing_cycle: verdict
                .billing_cycle
                .unwrap_or(crate::domain::BillingCycle::Monthly),
            next_billing_date: verdict.next_billing_date,
            status: SubscriptionStatus::Active,
            confidence_score: verdict.confidence,
            user_verified: false,
            first_detected: now,
            last_updated: now,
            category_id: None,
            notes: None,
        }
    }

    fn log_stale(&self, account: &MailAccount) {
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
                "resuming a stale processing run"
            );
        }
    }
}
