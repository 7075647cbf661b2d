//! subscan - entry point for the pipeline server

use std::sync::Arc;

use anyhow::Context;

use subscan::config::Settings;
use subscan::providers::ai::AnthropicLm;
use subscan::providers::mail::GmailMailbox;
use subscan::services::{ProcessRunner, Supervisor, SyncRunner, TokenBroker};
use subscan::storage::{Database, PlainCipher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("starting subscan");

    let settings = Settings::from_env();

    let db_path = std::env::var("SUBSCAN_DB").unwrap_or_else(|_| "subscan.db".to_string());
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("open database at {db_path}"))?;

    let client = reqwest::Client::new();
    let cipher = Arc::new(PlainCipher);

    let broker = Arc::new(TokenBroker::new(
        db.clone(),
        cipher,
        client.clone(),
        settings.token.clone(),
    ));
    let mailbox = Arc::new(GmailMailbox::new(client.clone()));

    let lm = settings
        .lm
        .api_key
        .clone()
        .map(|key| {
            Arc::new(AnthropicLm::new(client, key, settings.lm.clone()))
                as Arc<dyn subscan::providers::ai::LmProvider>
        });
    if lm.is_none() {
        tracing::warn!("no language-model API key configured; keyword classifier is authoritative");
    }

    let sync = Arc::new(SyncRunner::new(
        db.clone(),
        mailbox,
        broker,
        settings.sync.clone(),
    ));
    let process = Arc::new(ProcessRunner::new(db.clone(), lm, settings.processing.clone()));

    let supervisor = Supervisor::new(db, sync, process);
    supervisor.resume_interrupted().await;

    tracing::info!("subscan ready; waiting for work");

    // The HTTP collaborator drives the supervisor from here. Park the
    // runtime so background runners keep making progress.
    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;

    tracing::info!("shutting down");
    Ok(())
}
