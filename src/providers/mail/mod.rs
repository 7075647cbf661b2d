//! Remote mailbox access.
//!
//! - [`traits`] - The [`MailProvider`] seam the sync runner drives
//! - [`gmail`] - Gmail REST implementation
//! - [`query`] - Filter construction and fingerprinting

mod gmail;
pub mod query;
mod traits;

pub use gmail::GmailMailbox;
pub use query::{MailQuery, SENDER_PATTERNS, SUBJECT_KEYWORDS};
pub use traits::{MailProvider, MessagePage, ProviderError, Result};
