//! Cardmap Core - Offline pictogram taxonomy pipeline.
//!
//! Cardmap takes a set of pictogram cards (image + keyword) and produces a
//! navigable taxonomy: cards are filtered, embedded into a joint image-text
//! space, clustered into a tree with hierarchical spherical k-means, and
//! each leaf cluster gets a short theme tag.
//!
//! # Architecture
//!
//! ```text
//! Cards → Filter → Embed (CLIP) → Cluster → Tag → Dataset JSON
//! ```
//!
//! Every step persists its full output as a JSON artifact, so an
//! interrupted run resumes after the last completed step.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cardmap_core::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> cardmap_core::Result<()> {
//!     let config = Config::load()?;
//!     let orchestrator = Orchestrator::new(config);
//!
//!     let stats = orchestrator.run("./cards".as_ref(), false).await?;
//!     println!("Leaves: {}", stats.leaves);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod cluster;
pub mod config;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod llm;
pub mod manifest;
pub mod math;
pub mod pipeline;
pub mod tagging;
pub mod types;

// Re-exports for convenient access
pub use config::Config;
pub use embedding::EmbeddingEngine;
pub use error::{CardmapError, ConfigError, PipelineError, PipelineResult, Result};
pub use filter::ImageFilter;
pub use pipeline::{Orchestrator, Step};
pub use tagging::ClusterTagger;
pub use types::{CardCandidate, ClusterLabel, ClusterRecord, DatasetEntry, EmbeddingRecord, RunStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
