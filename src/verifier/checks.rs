//! The six structural checks.
//!
//! Each check reads the snapshot only and never short-circuits another.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::entity::EntityId;
use crate::graph::GraphSnapshot;
use crate::verifier::report::{CheckName, CheckResult, Findings, ViolationDetail};

/// Runs one check by name.
pub(crate) fn run_check(name: CheckName, snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    match name {
        CheckName::BidirectionalConsistency => bidirectional_consistency(snapshot, limit),
        CheckName::NetworkIntegrity => network_integrity(snapshot, limit),
        CheckName::CoOccurrenceValidity => co_occurrence_validity(snapshot, limit),
        CheckName::WeightConsistency => weight_consistency(snapshot, limit),
        CheckName::SelfLoopDetection => self_loop_detection(snapshot, limit),
        CheckName::BidirectionalEdgeWeightMatch => bidirectional_edge_weight_match(snapshot, limit),
    }
}

fn node_ids(snapshot: &GraphSnapshot) -> HashSet<EntityId> {
    snapshot.nodes.iter().map(|n| n.id).collect()
}

/// Adjacency entries must be mirrored with equal weight, and must agree with
/// the canonical edge list.
fn bidirectional_consistency(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let mut findings = Findings::new(CheckName::BidirectionalConsistency, true, limit);
    let Some(adjacency) = snapshot.adjacency.as_ref() else {
        findings.note("snapshot carries no adjacency representation");
        return findings.finish();
    };

    for (from, neighbors) in adjacency {
        for (to, weight) in neighbors {
            let reverse_weight = adjacency.get(to).and_then(|n| n.get(from)).copied();
            if reverse_weight != Some(*weight) {
                findings.violation(ViolationDetail::AdjacencyAsymmetry {
                    from: *from,
                    to: *to,
                    weight: *weight,
                    reverse_weight,
                });
            }
        }
    }

    for edge in &snapshot.edges {
        let adjacency_weight = adjacency
            .get(&edge.source_id)
            .and_then(|n| n.get(&edge.target_id))
            .copied();
        if adjacency_weight != Some(edge.weight) {
            findings.violation(ViolationDetail::AdjacencyEdgeMismatch {
                source_id: edge.source_id,
                target_id: edge.target_id,
                weight: edge.weight,
                adjacency_weight,
            });
        }
    }
    findings.finish()
}

fn network_integrity(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let mut findings = Findings::new(CheckName::NetworkIntegrity, true, limit);
    let nodes = node_ids(snapshot);
    for edge in &snapshot.edges {
        let mut endpoints = vec![edge.source_id];
        if edge.target_id != edge.source_id {
            endpoints.push(edge.target_id);
        }
        for missing in endpoints.into_iter().filter(|id| !nodes.contains(id)) {
            findings.violation(ViolationDetail::DanglingEndpoint {
                source_id: edge.source_id,
                target_id: edge.target_id,
                missing,
            });
        }
    }
    findings.finish()
}

/// Orphaned ledger records are warnings under a weight cutoff, which prunes
/// nodes legitimately, and violations otherwise.
fn co_occurrence_validity(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let tolerant = snapshot.min_edge_weight.is_some();
    let mut findings = Findings::new(CheckName::CoOccurrenceValidity, !tolerant, limit);
    if snapshot.ledger.is_empty() {
        findings.note("no co-occurrence records in snapshot");
        return findings.finish();
    }
    if let Some(cutoff) = snapshot.min_edge_weight {
        findings.note(format!(
            "min_edge_weight cutoff {cutoff} in force; orphaned records reported as warnings"
        ));
    }

    let nodes = node_ids(snapshot);
    for record in &snapshot.ledger {
        let missing: Vec<EntityId> = [record.source_id, record.target_id]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|id| !nodes.contains(id))
            .collect();
        if missing.is_empty() {
            continue;
        }
        let detail = ViolationDetail::OrphanedCoOccurrence {
            sequence: record.sequence,
            source_id: record.source_id,
            target_id: record.target_id,
            missing,
        };
        if tolerant {
            findings.warning(detail);
        } else {
            findings.violation(detail);
        }
    }
    findings.finish()
}

/// `weight` must equal the sum of recorded sub-counts. A surplus fully
/// explained by declared connection types without a sub-count is a
/// documentation gap and is reported as a warning.
fn weight_consistency(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let mut findings = Findings::new(CheckName::WeightConsistency, false, limit);
    for edge in &snapshot.edges {
        let expected = edge.documented_weight();
        if edge.weight == expected {
            continue;
        }
        let undocumented_types: Vec<String> =
            edge.undocumented_types().map(str::to_string).collect();
        let explained = edge.weight > expected && !undocumented_types.is_empty();
        let detail = ViolationDetail::WeightMismatch {
            source_id: edge.source_id,
            target_id: edge.target_id,
            expected,
            actual: edge.weight,
            undocumented_types,
        };
        if explained {
            findings.warning(detail);
        } else {
            findings.violation(detail);
        }
    }
    findings.finish()
}

fn self_loop_detection(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let mut findings = Findings::new(CheckName::SelfLoopDetection, false, limit);

    let mut contributing: BTreeMap<EntityId, Vec<u64>> = BTreeMap::new();
    for record in &snapshot.ledger {
        if record.source_id == record.target_id {
            contributing
                .entry(record.source_id)
                .or_default()
                .push(record.sequence);
        }
    }

    for edge in snapshot.edges.iter().filter(|e| e.is_self_loop()) {
        findings.violation(ViolationDetail::SelfLoop {
            entity: edge.source_id,
            weight: edge.weight,
            contributing_records: contributing.remove(&edge.source_id).unwrap_or_default(),
        });
    }
    findings.finish()
}

/// The display list must carry exactly the canonical weights, pair for pair.
fn bidirectional_edge_weight_match(snapshot: &GraphSnapshot, limit: usize) -> CheckResult {
    let mut findings = Findings::new(CheckName::BidirectionalEdgeWeightMatch, false, limit);
    let Some(reverse_edges) = snapshot.reverse_edges.as_ref() else {
        findings.note("snapshot carries no reverse-direction edge list");
        return findings.finish();
    };

    let canonical: BTreeMap<(EntityId, EntityId), u64> = snapshot
        .edges
        .iter()
        .map(|e| ((e.source_id, e.target_id), e.weight))
        .collect();
    let mut seen = BTreeSet::new();

    for reverse in reverse_edges {
        // display edges run from the larger id to the smaller
        let key = (reverse.target_id, reverse.source_id);
        seen.insert(key);
        let canonical_weight = canonical.get(&key).copied();
        if canonical_weight != Some(reverse.weight) {
            findings.violation(ViolationDetail::ReverseWeightMismatch {
                source_id: key.0,
                target_id: key.1,
                canonical_weight,
                reverse_weight: Some(reverse.weight),
            });
        }
    }

    for (key, weight) in &canonical {
        if !seen.contains(key) {
            findings.violation(ViolationDetail::ReverseWeightMismatch {
                source_id: key.0,
                target_id: key.1,
                canonical_weight: Some(*weight),
                reverse_weight: None,
            });
        }
    }
    findings.finish()
}
