//! Pipeline services.
//!
//! The coupled per-account state machines and their coordinator:
//!
//! - [`TokenBroker`]: mints bearers, refreshing proactively
//! - [`SyncRunner`]: count, fetch, persist, advance the resume cursor
//! - [`ProcessRunner`]: batch rows through the hybrid classifier
//! - [`Supervisor`]: start on demand, chain sync into processing, resume
//!   interrupted runs on boot, enforce at-most-one runner per phase

mod process_runner;
mod supervisor;
mod sync_runner;
mod token_broker;

pub use process_runner::{ProcessError, ProcessOutcome, ProcessRunner};
pub use supervisor::Supervisor;
pub use sync_runner::{SyncError, SyncOutcome, SyncRunner};
pub use token_broker::TokenBroker;
