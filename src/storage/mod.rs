//! Persistence layer.
//!
//! This module provides the storage layer for the pipeline:
//!
//! - SQLite database for accounts, credentials, mail rows, and the
//!   subscription ledger
//! - The symmetric-cipher seam for secrets stored at rest
//! - Async-safe database operations via tokio::task::spawn_blocking
//!
//! The database is the only durable shared resource; every state
//! transition of the runners goes through it.

mod cipher;
mod database;
pub mod queries;
mod schema;

pub use cipher::{CipherError, PlainCipher, TokenCipher};
pub use database::{Database, DatabaseError, Result};
