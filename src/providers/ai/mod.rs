//! Language-model provider.
//!
//! - [`traits`] - The [`LmProvider`] seam the process runner escalates to
//! - [`anthropic`] - Claude implementation with retry, JSON repair, and
//!   cost accounting
//! - [`content`] - Minimal HTML-to-text scrubbing for the prompt body

mod anthropic;
pub mod content;
mod traits;

pub use anthropic::{cost_usd, AnthropicLm};
pub use traits::{LmError, LmProvider, LmVerdict, Result};
