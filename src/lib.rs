//! # Entigraph - Entity Resolution and Relationship-Graph Integrity
//!
//! Entigraph turns noisy person and organization mentions extracted from a
//! document archive into a deduplicated set of canonical entities, builds a
//! weighted co-occurrence graph over them, and certifies that graph before
//! it is published.
//!
//! ## Core Concepts
//!
//! - **Mention**: A raw name string as extracted from one source document
//! - **CanonicalEntity**: The resolved identity a cluster of mentions refers to
//! - **EntityIndex**: The persistent name, alias and id lookup for canonical entities
//! - **Edge**: An undirected, weighted relationship between two entities
//! - **VerificationReport**: The six-check certificate of a graph snapshot
//!
//! ## Usage
//!
//! ```rust
//! use entigraph::config::{EntigraphConfig, GraphConfig, VerifierConfig};
//! use entigraph::graph::{CoOccurrence, GraphBuilder, SourceKind};
//! use entigraph::pipeline::IngestPipeline;
//! use entigraph::verifier::{GraphVerifier, Status};
//! use entigraph::{EntityIndex, EntityType, Mention};
//! use std::sync::Arc;
//!
//! let index = Arc::new(EntityIndex::new());
//! let pipeline = IngestPipeline::new(Arc::clone(&index), &EntigraphConfig::default())?;
//! pipeline.ingest_batch(&[
//!     Mention::new("Jeffrey Epstein", EntityType::Person, "doc-1", 0.9)?,
//!     Mention::new("J. Epstein", EntityType::Person, "doc-2", 0.8)?,
//!     Mention::new("Ghislaine Maxwell", EntityType::Person, "doc-1", 0.9)?,
//! ])?;
//! assert_eq!(index.len()?, 2);
//!
//! let mut graph = GraphBuilder::new(Arc::clone(&index));
//! graph.apply_batch(&[CoOccurrence::new(
//!     "J. Epstein",
//!     "Ghislaine Maxwell",
//!     SourceKind::Document,
//!     3,
//! )?])?;
//! let snapshot = graph.snapshot(&GraphConfig::default())?;
//!
//! let report = GraphVerifier::new(VerifierConfig::default())?.verify(&snapshot)?;
//! assert_eq!(report.status, Status::Pass);
//! # Ok::<(), entigraph::EntigraphError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod entity;
pub mod error;
pub mod similarity;

// Resolution
pub mod canonicalizer;
pub mod crossref;
pub mod index;
pub mod pipeline;
pub mod storage;

// Relationship graph
pub mod graph;
pub mod verifier;

// Re-export primary types at crate root for convenience
pub use canonicalizer::{Canonicalizer, ClusterSet};
pub use config::EntigraphConfig;
pub use crossref::{Candidate, CrossReferenceResult, CrossReferencer};
pub use entity::{CanonicalEntity, EntityId, EntityType, Mention};
pub use error::{
    EntigraphError, EntigraphResult, IndexCorruptionError, RuntimeError,
    UnresolvableReferenceError, ValidationError,
};
pub use graph::{CoOccurrence, Edge, GraphBuilder, GraphSnapshot, SourceKind};
pub use index::EntityIndex;
pub use pipeline::{IngestPipeline, ResolutionRuntime};
pub use storage::{IndexPersistence, StorageError};
pub use verifier::{GraphVerifier, Status, VerificationReport};
