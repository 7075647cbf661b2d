//! Symmetric encryption seam for stored secrets.
//!
//! Access tokens, refresh tokens, and client secrets are encrypted at
//! rest. The cipher itself is an external collaborator; this module only
//! defines the interface the token broker and account queries depend on,
//! plus a pass-through implementation for tests and local development.

use std::fmt;

use thiserror::Error;

/// Errors from encrypting or decrypting a stored secret.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    #[error("encrypt failed: {0}")]
    Encrypt(String),
}

/// Result type for cipher operations.
pub type Result<T> = std::result::Result<T, CipherError>;

/// Symmetric cipher over stored secrets.
///
/// Implementations must be deterministic per deployment key: a value
/// encrypted on one boot must decrypt on the next.
pub trait TokenCipher: Send + Sync {
    /// Encrypts a plaintext secret for storage.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypts a stored secret.
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Pass-through cipher for tests and local development.
///
/// Deployments substitute the vault's real cipher behind [`TokenCipher`].
pub struct PlainCipher;

impl TokenCipher for PlainCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

impl fmt::Debug for PlainCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCipher").finish()
    }
}
