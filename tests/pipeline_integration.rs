//! End-to-end pipeline tests.
//!
//! Drives the sync and process runners against an in-memory database and
//! scripted fake providers: a paginated mailbox with injectable failures
//! and a counting language model. Covers the happy path, interrupted-run
//! resume, filter drift, classifier gating, cost accounting, and
//! subscription dedup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use subscan::config::{ProcessingSettings, SyncSettings, TokenSettings};
use subscan::domain::{
    AccountId, AiProvider, BillingCycle, Classification, Credential, CredentialId, FetchedMessage,
    MailAccount, MailRow, ProcessingStatus, SubscriptionStatus, SyncStatus, UserId,
};
use subscan::providers::ai::{cost_usd, LmError, LmProvider, LmVerdict};
use subscan::providers::mail::{MailProvider, MessagePage, ProviderError};
use subscan::services::{ProcessRunner, Supervisor, SyncRunner, TokenBroker};
use subscan::storage::queries::{accounts, mails, subscriptions};
use subscan::storage::{Database, PlainCipher};

// ============================================================================
// Fakes
// ============================================================================

/// Scripted mailbox: serves a fixed message set through offset-based page
/// tokens, with optional one-shot failures.
struct FakeMailbox {
    messages: Vec<FetchedMessage>,
    list_calls: AtomicUsize,
    count_phase_calls: AtomicUsize,
    /// 1-indexed list call that fails with a network error.
    fail_list_call: Option<usize>,
    /// Message IDs whose fetch always fails.
    fail_fetch: HashSet<String>,
}

impl FakeMailbox {
    fn new(messages: Vec<FetchedMessage>) -> Self {
        Self {
            messages,
            list_calls: AtomicUsize::new(0),
            count_phase_calls: AtomicUsize::new(0),
            fail_list_call: None,
            fail_fetch: HashSet::new(),
        }
    }

    fn fail_list_on_call(mut self, call: usize) -> Self {
        self.fail_list_call = Some(call);
        self
    }

    fn fail_fetch_of(mut self, message_id: &str) -> Self {
        self.fail_fetch.insert(message_id.to_string());
        self
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list_page(
        &self,
        _bearer: &str,
        _filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_list_call == Some(call) {
            return Err(ProviderError::Connection("injected network failure".to_string()));
        }
        if page_size >= 500 {
            self.count_phase_calls.fetch_add(1, Ordering::SeqCst);
        }

        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + page_size as usize).min(self.messages.len());
        let ids = self.messages[offset..end]
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        let next_page_token = (end < self.messages.len()).then(|| end.to_string());

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        _bearer: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, ProviderError> {
        if self.fail_fetch.contains(message_id) {
            return Err(ProviderError::Internal("injected fetch failure".to_string()));
        }
        self.messages
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(message_id.to_string()))
    }
}

/// What the fake language model should do for every call.
enum LmScript {
    Verdict(Box<LmVerdict>),
    Unavailable,
    Unparseable,
}

/// Counting language model with a fixed script.
struct FakeLm {
    script: LmScript,
    calls: AtomicUsize,
}

impl FakeLm {
    fn returning(verdict: LmVerdict) -> Arc<Self> {
        Arc::new(Self {
            script: LmScript::Verdict(Box::new(verdict)),
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            script: LmScript::Unavailable,
            calls: AtomicUsize::new(0),
        })
    }

    fn unparseable() -> Arc<Self> {
        Arc::new(Self {
            script: LmScript::Unparseable,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LmProvider for FakeLm {
    async fn classify(&self, _mail: &MailRow) -> Result<LmVerdict, LmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            LmScript::Verdict(verdict) => Ok((**verdict).clone()),
            LmScript::Unavailable => Err(LmError::Api {
                status: 400,
                message: "injected outage".to_string(),
            }),
            LmScript::Unparseable => Err(LmError::InvalidResponse("injected garbage".to_string())),
        }
    }
}

fn netflix_verdict() -> LmVerdict {
    LmVerdict {
        classification: Classification {
            is_subscription: true,
            confidence: 0.98,
            service_name: Some("Netflix".to_string()),
            amount: Some(15.99),
            currency: Some("USD".to_string()),
            billing_cycle: Some(BillingCycle::Monthly),
            next_billing_date: None,
        },
        reasoning: "monthly streaming receipt".to_string(),
        input_tokens: 500,
        output_tokens: 60,
        cost: cost_usd(500, 60),
    }
}

// ============================================================================
// Seeding helpers
// ============================================================================

fn message(id: &str, subject: &str, sender: &str, body: &str) -> FetchedMessage {
    FetchedMessage {
        message_id: id.to_string(),
        subject: Some(subject.to_string()),
        sender: sender.to_string(),
        body_text: body.to_string(),
        body_html: String::new(),
        received_at: Utc::now(),
    }
}

fn numbered_messages(count: usize) -> Vec<FetchedMessage> {
    (1..=count)
        .map(|n| {
            message(
                &format!("m{n}"),
                &format!("Receipt {n}"),
                "billing@example.com",
                "thanks for your payment",
            )
        })
        .collect()
}

async fn seed_account(db: &Database) -> MailAccount {
    let credential = Credential {
        id: CredentialId::from("cred-1"),
        user_id: UserId::from("user-1"),
        client_id: "client".to_string(),
        client_secret_enc: "secret".to_string(),
        created_at: Utc::now(),
    };
    credentials_create(db, &credential).await;

    let account = MailAccount {
        id: AccountId::from("acct-1"),
        user_id: UserId::from("user-1"),
        credential_id: CredentialId::from("cred-1"),
        email: "person@example.com".to_string(),
        access_token_enc: "bearer".to_string(),
        refresh_token_enc: "refresh".to_string(),
        // Far-future expiry keeps the broker off the network.
        token_expiry: Utc::now() + ChronoDuration::hours(6),
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
    accounts::create(db, &account).await.unwrap();
    account
}

async fn credentials_create(db: &Database, credential: &Credential) {
    subscan::storage::queries::credentials::create(db, credential)
        .await
        .unwrap();
}

fn fast_sync_settings() -> SyncSettings {
    SyncSettings {
        page_delay: Duration::from_millis(1),
        ..SyncSettings::default()
    }
}

fn fast_processing_settings() -> ProcessingSettings {
    ProcessingSettings {
        batch_delay: Duration::from_millis(1),
        ..ProcessingSettings::default()
    }
}

fn broker(db: &Database) -> Arc<TokenBroker> {
    Arc::new(TokenBroker::new(
        db.clone(),
        Arc::new(PlainCipher),
        reqwest::Client::new(),
        TokenSettings::default(),
    ))
}

fn sync_runner(db: &Database, mailbox: Arc<FakeMailbox>) -> SyncRunner {
    SyncRunner::new(db.clone(), mailbox, broker(db), fast_sync_settings())
}

fn process_runner(db: &Database, lm: Option<Arc<FakeLm>>) -> ProcessRunner {
    ProcessRunner::new(
        db.clone(),
        lm.map(|lm| lm as Arc<dyn LmProvider>),
        fast_processing_settings(),
    )
}

async fn seed_mail_row(db: &Database, account_id: &AccountId, msg: &FetchedMessage) -> MailRow {
    mails::upsert(db, account_id, msg).await.unwrap();
    mails::get_by_message_id(db, account_id, &msg.message_id)
        .await
        .unwrap()
        .unwrap()
}

// ============================================================================
// Sync scenarios
// ============================================================================

#[tokio::test]
async fn clean_initial_sync() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    let mailbox = Arc::new(FakeMailbox::new(numbered_messages(3)));
    let outcome = sync_runner(&db, mailbox).run(&account.id).await.unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.processed, 3);
    assert!(!outcome.resumed);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.sync_status, SyncStatus::Completed);
    assert_eq!(account.total_emails, 3);
    assert_eq!(account.processed_emails, 3);
    assert!(account.is_initial_sync_complete);
    assert!(account.last_sync.is_some());
    assert!(account.last_page_token.is_none());

    assert_eq!(mails::count_for_account(&db, &account.id).await.unwrap(), 3);
}

#[tokio::test]
async fn interrupted_sync_resumes_without_duplicates() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    // Call 1 is the count page, call 2 the first fetch page; call 3
    // (second fetch page) dies on the network.
    let mailbox = Arc::new(FakeMailbox::new(numbered_messages(250)).fail_list_on_call(3));
    let err = sync_runner(&db, Arc::clone(&mailbox))
        .run(&account.id)
        .await
        .unwrap_err();
    assert!(matches!(err, subscan::services::SyncError::Network(_)));

    // The first page's cursor survived the failure.
    let interrupted = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(interrupted.sync_status, SyncStatus::Error);
    assert_eq!(interrupted.processed_emails, 100);
    assert_eq!(interrupted.total_emails, 250);
    assert!(interrupted.last_page_token.is_some());
    assert!(interrupted.query_hash.is_some());

    // Restart with a healthy mailbox sharing the same remote state.
    let healthy = Arc::new(FakeMailbox::new(numbered_messages(250)));
    let outcome = sync_runner(&db, Arc::clone(&healthy))
        .run(&account.id)
        .await
        .unwrap();

    assert!(outcome.resumed);
    assert_eq!(outcome.processed, 250);
    // Counting was skipped: no 500-sized page requests on the resumed run.
    assert_eq!(healthy.count_phase_calls.load(Ordering::SeqCst), 0);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.sync_status, SyncStatus::Completed);
    assert_eq!(account.processed_emails, 250);
    assert_eq!(mails::count_for_account(&db, &account.id).await.unwrap(), 250);
}

#[tokio::test]
async fn filter_drift_invalidates_resume() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    let mailbox = Arc::new(FakeMailbox::new(numbered_messages(250)).fail_list_on_call(3));
    sync_runner(&db, mailbox).run(&account.id).await.unwrap_err();

    // Simulate a keyword-policy edit between runs: the stored fingerprint
    // no longer matches what the builder produces.
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE accounts SET query_hash = 'stale-fingerprint!' WHERE id = 'acct-1'",
            [],
        )?;
        Ok(())
    })
    .await
    .unwrap();

    let healthy = Arc::new(FakeMailbox::new(numbered_messages(250)));
    let outcome = sync_runner(&db, Arc::clone(&healthy))
        .run(&account.id)
        .await
        .unwrap();

    // Fresh run: counted again from scratch.
    assert!(!outcome.resumed);
    assert_eq!(healthy.count_phase_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.total, 250);
    assert_eq!(outcome.processed, 250);

    // Rows persisted before the drift survive; the remote-ID key keeps
    // the refetch from duplicating them.
    assert_eq!(mails::count_for_account(&db, &account.id).await.unwrap(), 250);
}

#[tokio::test]
async fn bad_message_is_skipped_not_fatal() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    let mailbox = Arc::new(FakeMailbox::new(numbered_messages(5)).fail_fetch_of("m3"));
    let outcome = sync_runner(&db, mailbox).run(&account.id).await.unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.processed, 4);
    assert_eq!(mails::count_for_account(&db, &account.id).await.unwrap(), 4);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.sync_status, SyncStatus::Completed);
}

#[tokio::test]
async fn auth_failure_clears_resume_state() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    // Write a plausible cursor, then fail the run with an auth error.
    accounts::begin_sync(&db, &account.id, "abcd1234abcd1234").await.unwrap();
    accounts::write_sync_cursor(&db, &account.id, 100, Some("100"), Some("m100"))
        .await
        .unwrap();

    struct AuthFailMailbox;

    #[async_trait]
    impl MailProvider for AuthFailMailbox {
        async fn list_page(
            &self,
            _bearer: &str,
            _filter: &str,
            _page_size: u32,
            _page_token: Option<&str>,
        ) -> Result<MessagePage, ProviderError> {
            Err(ProviderError::Authentication("token revoked".to_string()))
        }

        async fn fetch_message(
            &self,
            _bearer: &str,
            message_id: &str,
        ) -> Result<FetchedMessage, ProviderError> {
            Err(ProviderError::NotFound(message_id.to_string()))
        }
    }

    let runner = SyncRunner::new(
        db.clone(),
        Arc::new(AuthFailMailbox),
        broker(&db),
        fast_sync_settings(),
    );
    let err = runner.run(&account.id).await.unwrap_err();
    assert!(matches!(err, subscan::services::SyncError::Authentication(_)));

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.sync_status, SyncStatus::Error);
    assert!(account.last_page_token.is_none());
    assert!(account.query_hash.is_none());
    assert!(account
        .last_error
        .as_deref()
        .unwrap()
        .contains("reconnect"));
}

// ============================================================================
// Processing scenarios
// ============================================================================

#[tokio::test]
async fn keyword_rejection_is_free() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your weekly newsletter",
            "news@example.com",
            "This week in birds.",
        ),
    )
    .await;

    let lm = FakeLm::returning(netflix_verdict());
    process_runner(&db, Some(Arc::clone(&lm)))
        .run(&account.id)
        .await
        .unwrap();

    // Gating law: below the threshold, the paid stage is never consulted.
    assert_eq!(lm.call_count(), 0);

    let row = mails::get_by_message_id(&db, &account.id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert!(row.processed_at.is_some());
    assert_eq!(row.ai_provider, Some(AiProvider::Keywords));
    assert!(!row.is_subscription);
    assert_eq!(row.subscription_confidence, 0.0);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.ai_cost_total, 0.0);
    assert_eq!(account.processing_status, ProcessingStatus::Completed);
    assert_eq!(account.emails_analyzed, 1);
}

#[tokio::test]
async fn uncertain_row_escalates_to_lm() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks for being a member.",
        ),
    )
    .await;

    let lm = FakeLm::returning(netflix_verdict());
    let outcome = process_runner(&db, Some(Arc::clone(&lm)))
        .run(&account.id)
        .await
        .unwrap();

    assert_eq!(lm.call_count(), 1);
    assert_eq!(outcome.analyzed, 1);
    assert_eq!(outcome.subscriptions_found, 1);

    let row = mails::get_by_message_id(&db, &account.id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.ai_provider, Some(AiProvider::Claude));
    assert!(row.is_subscription);
    assert_eq!(row.subscription_confidence, 0.98);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.subscriptions_found, 1);
    // Cost law: exactly round6(500 in, 60 out).
    assert!((account.ai_cost_total - cost_usd(500, 60)).abs() < 1e-9);

    let listed = subscriptions::list_for_user(&db, &account.user_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].service_name, "Netflix");
    assert_eq!(listed[0].amount, 15.99);
    assert_eq!(listed[0].status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn duplicate_subscription_is_suppressed() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks.",
        ),
    )
    .await;
    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m2",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks again.",
        ),
    )
    .await;

    let lm = FakeLm::returning(netflix_verdict());
    let outcome = process_runner(&db, Some(lm)).run(&account.id).await.unwrap();

    assert_eq!(outcome.analyzed, 2);
    // Second upsert conflicted on (user, service, amount).
    assert_eq!(outcome.subscriptions_found, 1);
    assert_eq!(
        subscriptions::count_for_user(&db, &account.user_id)
            .await
            .unwrap(),
        1
    );

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.subscriptions_found, 1);
    assert_eq!(account.emails_analyzed, 2);
}

#[tokio::test]
async fn lm_outage_falls_back_to_keywords() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks.",
        ),
    )
    .await;

    let lm = FakeLm::unavailable();
    process_runner(&db, Some(Arc::clone(&lm)))
        .run(&account.id)
        .await
        .unwrap();

    assert_eq!(lm.call_count(), 1);

    let row = mails::get_by_message_id(&db, &account.id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.ai_provider, Some(AiProvider::KeywordsFallback));
    // The keyword stage still extracted enough for the ledger.
    assert!(row.is_subscription);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.ai_cost_total, 0.0);
}

#[tokio::test]
async fn lm_disabled_falls_back_to_keywords() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks.",
        ),
    )
    .await;

    process_runner(&db, None).run(&account.id).await.unwrap();

    let row = mails::get_by_message_id(&db, &account.id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.ai_provider, Some(AiProvider::KeywordsFallback));
}

#[tokio::test]
async fn unparseable_lm_answers_burn_the_row_after_three_attempts() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    seed_mail_row(
        &db,
        &account.id,
        &message(
            "m1",
            "Your monthly Netflix receipt \u{2014} $15.99 charged",
            "billing@netflix.com",
            "Thanks.",
        ),
    )
    .await;

    let lm = FakeLm::unparseable();
    let outcome = process_runner(&db, Some(Arc::clone(&lm)))
        .run(&account.id)
        .await
        .unwrap();

    // Three visits, then the budget is consumed.
    assert_eq!(lm.call_count(), 3);
    assert_eq!(outcome.analyzed, 1);

    let row = mails::get_by_message_id(&db, &account.id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert!(row.processed_at.is_some());
    assert_eq!(row.ai_provider, Some(AiProvider::Error));
    assert!(!row.is_subscription);
    assert_eq!(row.subscription_confidence, 0.0);
    assert_eq!(row.analysis_attempts, 3);
    assert!(row.ai_reasoning.as_deref().unwrap().contains("3 attempts"));

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn empty_pool_completes_immediately() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    let outcome = process_runner(&db, None).run(&account.id).await.unwrap();
    assert_eq!(outcome.analyzed, 0);

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.processing_status, ProcessingStatus::Completed);
    assert_eq!(account.emails_to_analyze, 0);
}

#[tokio::test]
async fn interrupted_processing_resumes_counters() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    for n in 1..=4 {
        seed_mail_row(
            &db,
            &account.id,
            &message(
                &format!("m{n}"),
                "Some newsletter",
                "news@example.com",
                "no signals here",
            ),
        )
        .await;
    }

    // A dead runner left the account mid-run with 4 to analyze, 2 done.
    accounts::begin_processing(&db, &account.id, 4).await.unwrap();
    accounts::advance_processing(&db, &account.id, 2, 0).await.unwrap();
    for id in ["m1", "m2"] {
        let row = mails::get_by_message_id(&db, &account.id, id)
            .await
            .unwrap()
            .unwrap();
        mails::mark_processed(&db, &row.id, false, 0.0, None, AiProvider::Keywords, None)
            .await
            .unwrap();
    }

    process_runner(&db, None).run(&account.id).await.unwrap();

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.processing_status, ProcessingStatus::Completed);
    // Counters were resumed, not rezeroed.
    assert_eq!(account.emails_to_analyze, 4);
    assert_eq!(account.emails_analyzed, 4);
    assert_eq!(mails::count_unprocessed(&db, &account.id).await.unwrap(), 0);
}

// ============================================================================
// Supervisor
// ============================================================================

async fn wait_for<F>(db: &Database, account_id: &AccountId, predicate: F)
where
    F: Fn(&MailAccount) -> bool,
{
    for _ in 0..200 {
        if let Some(account) = accounts::get(db, account_id).await.unwrap() {
            if predicate(&account) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn sync_chains_into_processing() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    let mailbox = Arc::new(FakeMailbox::new(vec![message(
        "m1",
        "Your weekly newsletter",
        "news@example.com",
        "no signals",
    )]));
    let sync = Arc::new(sync_runner(&db, mailbox));
    let process = Arc::new(process_runner(&db, None));
    let supervisor = Supervisor::new(db.clone(), sync, process);

    let started = supervisor
        .start_sync(account.id.clone(), account.user_id.clone())
        .await;
    assert!(started);

    wait_for(&db, &account.id, |a| {
        a.sync_status == SyncStatus::Completed
            && a.processing_status == ProcessingStatus::Completed
    })
    .await;

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.processed_emails, 1);
    assert_eq!(account.emails_analyzed, 1);
}

#[tokio::test]
async fn double_start_is_refused() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    // Enough pages that the first run is still going when the second
    // start arrives.
    let mailbox = Arc::new(FakeMailbox::new(numbered_messages(300)));
    let sync = Arc::new(SyncRunner::new(
        db.clone(),
        mailbox,
        broker(&db),
        SyncSettings {
            page_delay: Duration::from_millis(50),
            ..SyncSettings::default()
        },
    ));
    let process = Arc::new(process_runner(&db, None));
    let supervisor = Supervisor::new(db.clone(), sync, process);

    assert!(
        supervisor
            .start_sync(account.id.clone(), account.user_id.clone())
            .await
    );
    assert!(
        !supervisor
            .start_sync(account.id.clone(), account.user_id.clone())
            .await
    );

    wait_for(&db, &account.id, |a| a.sync_status == SyncStatus::Completed).await;
}

#[tokio::test]
async fn boot_resume_restarts_stuck_runs() {
    let db = Database::open_in_memory().await.unwrap();
    let account = seed_account(&db).await;

    // A crashed process left the account stuck in `syncing` with a valid
    // cursor. Recompute the fingerprint the runner will derive.
    let query = subscan::providers::mail::query::initial_query(Utc::now(), 12);
    accounts::begin_sync(&db, &account.id, &query.fingerprint)
        .await
        .unwrap();
    accounts::set_total_emails(&db, &account.id, 5).await.unwrap();

    let messages = numbered_messages(5);
    for msg in &messages[..2] {
        mails::upsert(&db, &account.id, msg).await.unwrap();
    }
    accounts::write_sync_cursor(&db, &account.id, 2, Some("2"), Some("m2"))
        .await
        .unwrap();

    let mailbox = Arc::new(FakeMailbox::new(messages));
    let sync = Arc::new(sync_runner(&db, Arc::clone(&mailbox)));
    let process = Arc::new(process_runner(&db, None));
    let supervisor = Supervisor::new(db.clone(), sync, process);

    supervisor.resume_interrupted().await;

    wait_for(&db, &account.id, |a| {
        a.sync_status == SyncStatus::Completed
            && a.processing_status == ProcessingStatus::Completed
    })
    .await;

    let account = accounts::get(&db, &account.id).await.unwrap().unwrap();
    assert_eq!(account.processed_emails, 5);
    assert_eq!(mails::count_for_account(&db, &account.id).await.unwrap(), 5);
    // Resumed run trusted the stored total; no recount happened.
    assert_eq!(mailbox.count_phase_calls.load(Ordering::SeqCst), 0);
}
