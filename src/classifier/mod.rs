//! Hybrid classification, first stage.
//!
//! The deterministic keyword scorer lives here; the paid second stage is
//! the language-model provider under `providers::ai`.

pub mod keyword;

pub use keyword::{classify, KeywordVerdict};
