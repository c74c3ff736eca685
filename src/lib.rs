//! # Handover-RS: AI-Assisted Codebase Documentation Engine
//!
//! Handover turns a repository on disk plus a language-model completion
//! endpoint into a set of cross-referenced markdown documents describing
//! the code. The engine is built around five cooperating subsystems:
//!
//! - **Orchestrator**: a reactive dependency graph running analysis, AI
//!   rounds, and rendering with fan-out, fan-in, and failure propagation
//! - **Context packer**: priority-tiered file packing under a token budget
//!   with changed-file promotion and oversize handling
//! - **Round pipeline**: six structured AI calls with claim validation,
//!   quality gates, and grounding retries
//! - **Round cache**: content-hash keyed, cascade-invalidated persistence
//!   so unchanged repositories re-use prior results
//! - **Provider layer**: rate-limited, retrying access to completion
//!   endpoints with streaming token callbacks and cost accounting
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          CLI Layer                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Pipeline   │  Rounds     │  Analysis   │  I/O & Providers   │
//! │             │             │             │                    │
//! │ • Assembler │ • Runner    │ • Scan      │ • Round cache      │
//! │ • Display   │ • Validator │ • Hashing   │ • Anthropic        │
//! │ • DAG       │ • Compressor│ • Packer    │ • OpenAI-compat    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handover_rs::core::config::HandoverConfig;
//! use handover_rs::pipeline::{run_pipeline, PipelineOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HandoverConfig::load(std::path::Path::new("."))?;
//!     let outcome = run_pipeline(PipelineOptions::new(".".into(), config)).await?;
//!     println!("{} documents generated", outcome.documents.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod cache;
pub mod core;
pub mod orchestrator;
pub mod packer;
pub mod pipeline;
pub mod provider;
pub mod render;
pub mod rounds;

pub use crate::core::config::HandoverConfig;
pub use crate::core::errors::{HandoverError, Result};
pub use crate::pipeline::{run_pipeline, PipelineOptions, PipelineOutcome};
