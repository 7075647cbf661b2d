//! Bearer minting for mailbox accounts.
//!
//! The broker returns a valid bearer for an account: the stored access
//! token when its expiry is comfortably in the future, otherwise a fresh
//! one from the provider's token endpoint. Refreshed tokens are written
//! back encrypted, together with the new expiry, in one transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::TokenSettings;
use crate::domain::AccountId;
use crate::providers::mail::ProviderError;
use crate::storage::queries::{accounts, credentials};
use crate::storage::{Database, TokenCipher};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Mints bearers for mailbox accounts, refreshing proactively.
pub struct TokenBroker {
    db: Database,
    cipher: Arc<dyn TokenCipher>,
    client: reqwest::Client,
    token_url: String,
    refresh_buffer: Duration,
}

impl TokenBroker {
    /// Creates a broker against the production token endpoint.
    pub fn new(
        db: Database,
        cipher: Arc<dyn TokenCipher>,
        client: reqwest::Client,
        settings: TokenSettings,
    ) -> Self {
        Self {
            db,
            cipher,
            client,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            refresh_buffer: settings.refresh_buffer,
        }
    }

    /// Overrides the token endpoint URL.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Whether a token expiring at `expiry` must be refreshed now.
    fn needs_refresh(expiry: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
        expiry - now < chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero())
    }

    /// Returns a valid bearer for the account.
    ///
    /// A refresh failure is an authentication error: the stored grant is
    /// no longer good and the owner must reconnect.
    pub async fn access_token(&self, account_id: &AccountId) -> Result<String, ProviderError> {
        let account = accounts::get_required(&self.db, account_id)
            .await
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        if !Self::needs_refresh(account.token_expiry, Utc::now(), self.refresh_buffer) {
            return self
                .cipher
                .decrypt(&account.access_token_enc)
                .map_err(|e| ProviderError::Internal(format!("token decrypt: {e}")));
        }

        let credential = credentials::get_required(&self.db, &account.credential_id)
            .await
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let refresh_token = self
            .cipher
            .decrypt(&account.refresh_token_enc)
            .map_err(|e| ProviderError::Internal(format!("token decrypt: {e}")))?;
        let client_secret = self
            .cipher
            .decrypt(&credential.client_secret_enc)
            .map_err(|e| ProviderError::Internal(format!("secret decrypt: {e}")))?;

        tracing::debug!(account_id = %account_id, "refreshing access token");

        let params = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse token response: {e}")))?;

        let expiry = Utc::now() + chrono::Duration::seconds(token.expires_in as i64);
        let encrypted = self
            .cipher
            .encrypt(&token.access_token)
            .map_err(|e| ProviderError::Internal(format!("token encrypt: {e}")))?;

        accounts::store_access_token(&self.db, account_id, &encrypted, expiry)
            .await
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        Ok(token.access_token)
    }
}
