//! Immutable graph snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{CanonicalEntity, EntityId};
use crate::error::{EntigraphError, EntigraphResult};
use crate::graph::{Edge, SourceKind};

/// Per-node neighbor weights, recorded in both directions.
pub type Adjacency = BTreeMap<EntityId, BTreeMap<EntityId, u64>>;

/// One co-occurrence consumed by the builder, after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrenceRecord {
    /// Order of consumption, starting at 1.
    pub sequence: u64,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub source_kind: SourceKind,
    pub increment: u64,
}

/// Reverse-direction display edge, `source_id > target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEdge {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub weight: u64,
}

/// Graph output document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOutput {
    pub nodes: Vec<CanonicalEntity>,
    pub edges: Vec<Edge>,
}

/// Builds the dual adjacency representation from canonical edges.
#[must_use]
pub fn adjacency_from_edges(edges: &[Edge]) -> Adjacency {
    let mut adjacency = Adjacency::new();
    for edge in edges {
        adjacency
            .entry(edge.source_id)
            .or_default()
            .insert(edge.target_id, edge.weight);
        adjacency
            .entry(edge.target_id)
            .or_default()
            .insert(edge.source_id, edge.weight);
    }
    adjacency
}

/// Immutable view of every entity and edge at one point in time.
///
/// Nodes are sorted by id and edges by `(source_id, target_id)`, so two
/// snapshots of the same state serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<CanonicalEntity>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjacency: Option<Adjacency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_edges: Option<Vec<ReverseEdge>>,
    #[serde(default)]
    pub ledger: Vec<CoOccurrenceRecord>,
    /// Cutoff applied when the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_edge_weight: Option<u64>,
}

impl GraphSnapshot {
    /// Snapshot with adjacency derived from `edges` and nothing else.
    #[must_use]
    pub fn new(mut nodes: Vec<CanonicalEntity>, mut edges: Vec<Edge>) -> Self {
        nodes.sort_by_key(|n| n.id);
        edges.sort_by_key(|e| (e.source_id, e.target_id));
        let adjacency = adjacency_from_edges(&edges);
        Self {
            nodes,
            edges,
            adjacency: Some(adjacency),
            reverse_edges: None,
            ledger: Vec::new(),
            min_edge_weight: None,
        }
    }

    #[must_use]
    pub fn with_reverse_edges(mut self, reverse_edges: Vec<ReverseEdge>) -> Self {
        self.reverse_edges = Some(reverse_edges);
        self
    }

    /// Reverse list mirroring the canonical edges exactly.
    #[must_use]
    pub fn with_mirrored_reverse_edges(self) -> Self {
        let reverse = self
            .edges
            .iter()
            .map(|e| ReverseEdge {
                source_id: e.target_id,
                target_id: e.source_id,
                weight: e.weight,
            })
            .collect();
        self.with_reverse_edges(reverse)
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Vec<CoOccurrenceRecord>) -> Self {
        self.ledger = ledger;
        self
    }

    #[must_use]
    pub const fn with_cutoff(mut self, min_edge_weight: Option<u64>) -> Self {
        self.min_edge_weight = min_edge_weight;
        self
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// BLAKE3 digest of the snapshot's JSON form, hex encoded.
    pub fn digest(&self) -> EntigraphResult<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EntigraphError::internal(format!("snapshot serialization: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Nodes and edges in output form.
    #[must_use]
    pub fn to_output(&self) -> GraphOutput {
        GraphOutput {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }
}
