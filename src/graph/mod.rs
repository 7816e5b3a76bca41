//! Relationship graph.
//!
//! ```text
//! CoOccurrence ──resolve via EntityIndex──► Edge (min_id, max_id)
//!                                            │  weight = Σ sub-counts
//!                                            ▼
//!                                     GraphSnapshot ──► GraphVerifier
//! ```

mod builder;
mod cooccurrence;
mod edge;
mod snapshot;

pub use builder::{GraphBatchReport, GraphBuilder};
pub use cooccurrence::{parse_cooccurrences, CoOccurrence, SourceKind};
pub use edge::Edge;
pub use snapshot::{
    adjacency_from_edges, Adjacency, CoOccurrenceRecord, GraphOutput, GraphSnapshot, ReverseEdge,
};
