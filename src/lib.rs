//! subscan - mailbox ingestion and subscription extraction pipeline
//!
//! This crate ingests a user's mail from a cloud mailbox provider,
//! classifies each message as a recurring-subscription artifact or not
//! through a two-stage hybrid classifier, and materialises detected
//! subscriptions into a per-user ledger.
//!
//! The HTTP surface, OAuth handshake, and browser UI are external
//! collaborators; they drive this crate through the [`services::Supervisor`].

pub mod classifier;
pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
