//! Configuration for the pipeline.
//!
//! Settings are loaded from the environment at startup and passed down to
//! the runners by value.

mod settings;

pub use settings::{LmSettings, ProcessingSettings, Settings, SyncSettings, TokenSettings};
