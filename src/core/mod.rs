//! Core types shared across the handover engine: configuration, errors,
//! and token accounting.

pub mod config;
pub mod errors;
pub mod tokens;

pub use config::{Audience, HandoverConfig};
pub use errors::{HandoverError, Result, ResultExt};
pub use tokens::{estimate_tokens, CacheSavings, TokenTracker, Usage};
