//! Relationship graph accumulation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::entity::{EntityId, RejectedRecord};
use crate::error::{
    EntigraphResult, ReferenceSide, UnresolvableReferenceError, UnresolvedReference, ValidationError,
};
use crate::graph::{CoOccurrence, CoOccurrenceRecord, Edge, GraphSnapshot, ReverseEdge, SourceKind};
use crate::index::EntityIndex;

/// Outcome of one applied co-occurrence batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphBatchReport {
    pub received: usize,
    pub applied: usize,
    /// Invalid records and self-loop candidates, with positions.
    pub rejected: Vec<RejectedRecord>,
    pub self_loops_rejected: usize,
    pub edges_touched: usize,
    pub edges_created: usize,
}

struct Staged {
    key: (EntityId, EntityId),
    kind: SourceKind,
    increment: u64,
}

/// Accumulates weighted edges from co-occurrence batches.
///
/// Endpoints are resolved through the shared [`EntityIndex`]. A batch is
/// staged in full before anything is written, so a batch with an
/// unresolvable reference leaves the graph untouched.
#[derive(Debug)]
pub struct GraphBuilder {
    index: Arc<EntityIndex>,
    edges: BTreeMap<(EntityId, EntityId), Edge>,
    ledger: Vec<CoOccurrenceRecord>,
    self_loops_rejected: u64,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(index: Arc<EntityIndex>) -> Self {
        Self {
            index,
            edges: BTreeMap::new(),
            ledger: Vec::new(),
            self_loops_rejected: 0,
        }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Current edge between two entities, in either argument order.
    #[must_use]
    pub fn edge(&self, a: EntityId, b: EntityId) -> Option<&Edge> {
        self.edges.get(&Edge::key(a, b))
    }

    /// Records consumed so far.
    #[must_use]
    pub fn ledger(&self) -> &[CoOccurrenceRecord] {
        &self.ledger
    }

    /// Total self-loop candidates rejected across all batches.
    #[must_use]
    pub const fn self_loops_rejected(&self) -> u64 {
        self.self_loops_rejected
    }

    /// Applies one batch.
    ///
    /// Invalid records and self-loops are rejected and counted without
    /// aborting the batch.
    ///
    /// # Errors
    ///
    /// Returns [`UnresolvableReferenceError`] listing every reference the
    /// index cannot resolve. Nothing from the batch is applied in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use entigraph::graph::{CoOccurrence, GraphBuilder, SourceKind};
    /// use entigraph::{CanonicalEntity, EntityIndex, EntityType};
    ///
    /// let index = Arc::new(EntityIndex::new());
    /// let a = index.upsert(CanonicalEntity::new("Jeffrey Epstein", EntityType::Person))?.id();
    /// let b = index.upsert(CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person))?.id();
    ///
    /// let mut builder = GraphBuilder::new(index);
    /// builder.apply_batch(&[
    ///     CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 205)?,
    ///     CoOccurrence::new("Ghislaine Maxwell", "Jeffrey Epstein", SourceKind::FlightLog, 291)?,
    /// ])?;
    /// assert_eq!(builder.edge(a, b).unwrap().weight, 496);
    /// # Ok::<(), entigraph::EntigraphError>(())
    /// ```
    pub fn apply_batch(&mut self, records: &[CoOccurrence]) -> EntigraphResult<GraphBatchReport> {
        let mut report = GraphBatchReport {
            received: records.len(),
            ..GraphBatchReport::default()
        };
        let mut staged = Vec::with_capacity(records.len());
        let mut unresolved = Vec::new();

        for (position, record) in records.iter().enumerate() {
            if let Err(e) = record.validate() {
                report.rejected.push(RejectedRecord::new(position, &e));
                continue;
            }
            let a = self.index.resolve_reference(record.entity_a.trim())?;
            let b = self.index.resolve_reference(record.entity_b.trim())?;
            let (a, b) = match (a, b) {
                (Some(a), Some(b)) => (a, b),
                (a, b) => {
                    if a.is_none() {
                        unresolved.push(UnresolvedReference {
                            position,
                            side: ReferenceSide::EntityA,
                            reference: record.entity_a.clone(),
                        });
                    }
                    if b.is_none() {
                        unresolved.push(UnresolvedReference {
                            position,
                            side: ReferenceSide::EntityB,
                            reference: record.entity_b.clone(),
                        });
                    }
                    continue;
                }
            };
            if a.id == b.id {
                let e = ValidationError::SelfLoop { entity: a.id };
                tracing::warn!(position, entity = %a.canonical_name, "rejected self-loop co-occurrence");
                report.rejected.push(RejectedRecord::new(position, &e));
                report.self_loops_rejected += 1;
                continue;
            }
            // validate() guarantees a positive increment
            let increment = u64::try_from(record.increment).unwrap_or(0);
            staged.push(Staged {
                key: Edge::key(a.id, b.id),
                kind: record.source_kind,
                increment,
            });
        }

        if !unresolved.is_empty() {
            tracing::warn!(
                unresolved = unresolved.len(),
                "co-occurrence batch references unknown entities; batch not applied"
            );
            return Err(UnresolvableReferenceError { unresolved }.into());
        }

        let mut touched = BTreeSet::new();
        for s in staged {
            let edge = self.edges.entry(s.key).or_insert_with(|| {
                report.edges_created += 1;
                Edge::new(s.key.0, s.key.1)
            });
            edge.record(s.kind, s.increment);
            touched.insert(s.key);
            let sequence = self.ledger.len() as u64 + 1;
            self.ledger.push(CoOccurrenceRecord {
                sequence,
                source_id: s.key.0,
                target_id: s.key.1,
                source_kind: s.kind,
                increment: s.increment,
            });
            report.applied += 1;
        }
        report.edges_touched = touched.len();
        self.self_loops_rejected += report.self_loops_rejected as u64;

        tracing::info!(
            received = report.received,
            applied = report.applied,
            rejected = report.rejected.len(),
            edges_touched = report.edges_touched,
            "applied co-occurrence batch"
        );
        Ok(report)
    }

    /// Takes an immutable snapshot.
    ///
    /// Endpoints absorbed by later index merges are re-pointed at the
    /// surviving entity. With `min_edge_weight` set, lighter edges are cut
    /// first and nodes left without edges are dropped after.
    pub fn snapshot(&self, config: &GraphConfig) -> EntigraphResult<GraphSnapshot> {
        let mut redirects: BTreeMap<EntityId, EntityId> = BTreeMap::new();
        let mut resolve = |id: EntityId| -> EntigraphResult<EntityId> {
            if let Some(live) = redirects.get(&id) {
                return Ok(*live);
            }
            let live = self.index.resolve_id(id)?;
            redirects.insert(id, live);
            Ok(live)
        };

        let mut edges: BTreeMap<(EntityId, EntityId), Edge> = BTreeMap::new();
        for edge in self.edges.values() {
            let key = Edge::key(resolve(edge.source_id)?, resolve(edge.target_id)?);
            if key.0 == key.1 {
                tracing::warn!(entity = %key.0, "entity merge collapsed an edge into a self-loop");
            }
            edges
                .entry(key)
                .or_insert_with(|| Edge::new(key.0, key.1))
                .absorb(edge);
        }

        let mut ledger = Vec::with_capacity(self.ledger.len());
        for record in &self.ledger {
            let (source_id, target_id) =
                Edge::key(resolve(record.source_id)?, resolve(record.target_id)?);
            ledger.push(CoOccurrenceRecord {
                source_id,
                target_id,
                ..record.clone()
            });
        }

        if let Some(cutoff) = config.min_edge_weight {
            let before = edges.len();
            edges.retain(|_, e| e.weight >= cutoff);
            tracing::debug!(cutoff, pruned = before - edges.len(), "applied edge weight cutoff");
        }

        let mut nodes = self.index.entities()?;
        if config.min_edge_weight.is_some() {
            let connected: BTreeSet<EntityId> = edges.keys().flat_map(|(a, b)| [*a, *b]).collect();
            nodes.retain(|n| connected.contains(&n.id));
        }

        let mut snapshot = GraphSnapshot::new(nodes, edges.into_values().collect())
            .with_ledger(ledger)
            .with_cutoff(config.min_edge_weight);

        if config.emit_reverse_edges {
            let reverse = reverse_edges_from_ledger(&snapshot);
            snapshot = snapshot.with_reverse_edges(reverse);
        }
        Ok(snapshot)
    }
}

/// Sums the ledger per pair, independently of the edge accumulators, for the
/// pairs that survived the cutoff.
fn reverse_edges_from_ledger(snapshot: &GraphSnapshot) -> Vec<ReverseEdge> {
    let kept: BTreeSet<(EntityId, EntityId)> = snapshot
        .edges
        .iter()
        .map(|e| (e.source_id, e.target_id))
        .collect();
    let mut totals: BTreeMap<(EntityId, EntityId), u64> = BTreeMap::new();
    for record in &snapshot.ledger {
        let key = (record.source_id, record.target_id);
        if kept.contains(&key) {
            let total = totals.entry(key).or_default();
            *total = total.saturating_add(record.increment);
        }
    }
    totals
        .into_iter()
        .map(|((lo, hi), weight)| ReverseEdge {
            source_id: hi,
            target_id: lo,
            weight,
        })
        .collect()
}
