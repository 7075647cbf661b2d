//! Runner lifecycle coordination.
//!
//! The supervisor owns the at-most-one interlock: an in-process set of
//! live runners per phase, layered over the advisory status check on the
//! account row. `start_sync` and `start_processing` are fire-and-forget;
//! the spawned task outlives the request that triggered it, and its
//! failures never propagate to the caller. A successful sync chains
//! straight into processing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::domain::{AccountId, ProcessingStatus, SyncStatus, UserId};
use crate::services::process_runner::ProcessRunner;
use crate::services::sync_runner::SyncRunner;
use crate::storage::queries::accounts;
use crate::storage::Database;

/// Coordinates sync and process runners across accounts.
pub struct Supervisor {
    db: Database,
    sync: Arc<SyncRunner>,
    process: Arc<ProcessRunner>,
    /// Accounts with a live sync runner in this process.
    syncing: Mutex<HashSet<AccountId>>,
    /// Accounts with a live process runner in this process.
    processing: Mutex<HashSet<AccountId>>,
}

impl Supervisor {
    /// Creates a supervisor over the given runners.
    pub fn new(db: Database, sync: Arc<SyncRunner>, process: Arc<ProcessRunner>) -> Arc<Self> {
        Arc::new(Self {
            db,
            sync,
            process,
            syncing: Mutex::new(HashSet::new()),
            processing: Mutex::new(HashSet::new()),
        })
    }

    /// Starts a background sync for the account.
    ///
    /// Refuses when a runner is already live here or the account row says
    /// one is in flight elsewhere. Returns whether a runner was started.
    pub async fn start_sync(self: &Arc<Self>, account_id: AccountId, user_id: UserId) -> bool {
        if !self.claim(&self.syncing, &account_id) {
            tracing::info!(account_id = %account_id, "sync already running, refusing start");
            return false;
        }

        let status = match accounts::get(&self.db, &account_id).await {
            Ok(Some(account)) => account.sync_status,
            Ok(None) => {
                tracing::warn!(account_id = %account_id, "sync requested for unknown account");
                self.release(&self.syncing, &account_id);
                return false;
            }
            Err(err) => {
                tracing::error!(account_id = %account_id, error = %err, "sync start failed");
                self.release(&self.syncing, &account_id);
                return false;
            }
        };

        if status == SyncStatus::Syncing {
            tracing::info!(account_id = %account_id, "account already syncing, refusing start");
            self.release(&self.syncing, &account_id);
            return false;
        }

        self.spawn_sync(account_id, user_id);
        true
    }

    /// Starts a background processing run for the account.
    ///
    /// Same interlock as [`start_sync`](Self::start_sync), keyed on the
    /// processing status.
    pub async fn start_processing(self: &Arc<Self>, account_id: AccountId, user_id: UserId) -> bool {
        if !self.claim(&self.processing, &account_id) {
            tracing::info!(account_id = %account_id, "processing already running, refusing start");
            return false;
        }

        let status = match accounts::get(&self.db, &account_id).await {
            Ok(Some(account)) => account.processing_status,
            Ok(None) => {
                tracing::warn!(account_id = %account_id, "processing requested for unknown account");
                self.release(&self.processing, &account_id);
                return false;
            }
            Err(err) => {
                tracing::error!(account_id = %account_id, error = %err, "processing start failed");
                self.release(&self.processing, &account_id);
                return false;
            }
        };

        if status == ProcessingStatus::Analyzing {
            tracing::info!(account_id = %account_id, "account already analyzing, refusing start");
            self.release(&self.processing, &account_id);
            return false;
        }

        self.spawn_processing(account_id, user_id);
        true
    }

    /// Restarts every run a dead process left mid-flight.
    ///
    /// Called exactly once at server start. The advisory status check is
    /// skipped on purpose: a stuck `syncing`/`analyzing` status is
    /// precisely what this resumes. Failures are logged, never fatal to
    /// boot.
    pub async fn resume_interrupted(self: &Arc<Self>) {
        let interrupted = match accounts::find_interrupted(&self.db).await {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::error!(error = %err, "scan for interrupted runs failed");
                return;
            }
        };

        if interrupted.is_empty() {
            tracing::info!("no interrupted runs to resume");
            return;
        }

        tracing::info!(count = interrupted.len(), "resuming interrupted runs");

        for account in interrupted {
            if account.sync_status == SyncStatus::Syncing {
                if self.claim(&self.syncing, &account.id) {
                    self.spawn_sync(account.id.clone(), account.user_id.clone());
                }
            } else if account.processing_status == ProcessingStatus::Analyzing {
                if self.claim(&self.processing, &account.id) {
                    self.spawn_processing(account.id.clone(), account.user_id.clone());
                }
            }
        }
    }

    fn spawn_sync(self: &Arc<Self>, account_id: AccountId, user_id: UserId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(account_id = %account_id, user_id = %user_id, "sync starting");

            let result = this.sync.run(&account_id).await;
            this.release(&this.syncing, &account_id);

            match result {
                Ok(outcome) => {
                    tracing::info!(
                        account_id = %account_id,
                        processed = outcome.processed,
                        "sync finished, chaining into processing"
                    );
                    this.start_processing(account_id, user_id).await;
                }
                Err(err) => {
                    tracing::error!(account_id = %account_id, error = %err, "sync task failed");
                }
            }
        });
    }

    fn spawn_processing(self: &Arc<Self>, account_id: AccountId, user_id: UserId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(account_id = %account_id, user_id = %user_id, "processing starting");

            let result = this.process.run(&account_id).await;
            this.release(&this.processing, &account_id);

            match result {
                Ok(outcome) => {
                    tracing::info!(
                        account_id = %account_id,
                        analyzed = outcome.analyzed,
                        subscriptions = outcome.subscriptions_found,
                        "processing task finished"
                    );
                }
                Err(err) => {
                    tracing::error!(account_id = %account_id, error = %err, "processing task failed");
                }
            }
        });
    }

    fn claim(&self, set: &Mutex<HashSet<AccountId>>, account_id: &AccountId) -> bool {
        set.lock()
            .map(|mut live| live.insert(account_id.clone()))
            .unwrap_or(false)
    }

    fn release(&self, set: &Mutex<HashSet<AccountId>>, account_id: &AccountId) {
        if let Ok(mut live) = set.lock() {
            live.remove(account_id);
        }
    }
}
