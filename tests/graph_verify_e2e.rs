//! End-to-end graph construction and verification.

use std::sync::Arc;

use entigraph::config::{EntigraphConfig, GraphConfig, VerifierConfig};
use entigraph::graph::{CoOccurrence, GraphBuilder, GraphSnapshot, SourceKind};
use entigraph::pipeline::IngestPipeline;
use entigraph::verifier::{CheckName, GraphVerifier, Status, ViolationDetail};
use entigraph::{CanonicalEntity, EntigraphError, EntityIndex, EntityType, Mention};

fn seeded_index(names: &[&str]) -> Arc<EntityIndex> {
    let index = Arc::new(EntityIndex::new());
    let pipeline = IngestPipeline::new(Arc::clone(&index), &EntigraphConfig::default()).unwrap();
    let mentions: Vec<Mention> = names
        .iter()
        .map(|n| Mention::new(*n, EntityType::Person, "seed", 0.9).unwrap())
        .collect();
    pipeline.ingest_batch(&mentions).unwrap();
    index
}

fn verifier() -> GraphVerifier {
    GraphVerifier::new(VerifierConfig::default()).unwrap()
}

#[test]
fn weight_is_sum_of_source_counts() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(Arc::clone(&index));
    builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 205).unwrap(),
            CoOccurrence::new("Ghislaine Maxwell", "jeffrey  epstein", SourceKind::FlightLog, 291).unwrap(),
        ])
        .unwrap();

    let snapshot = builder.snapshot(&GraphConfig::default()).unwrap();
    assert_eq!(snapshot.edges.len(), 1);
    let edge = &snapshot.edges[0];
    assert_eq!(edge.document_count, 205);
    assert_eq!(edge.flight_log_count, 291);
    assert_eq!(edge.weight, 496);
    assert!(edge.source_id < edge.target_id);
    assert!(edge.connection_types.contains("document"));
    assert!(edge.connection_types.contains("flight_log"));

    let report = verifier().verify(&snapshot).unwrap();
    assert_eq!(report.status, Status::Pass, "{report:#?}");
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn stored_weight_drift_is_reported_with_expected_and_actual() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(index);
    builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 205).unwrap(),
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::FlightLog, 291).unwrap(),
        ])
        .unwrap();
    let mut snapshot = builder.snapshot(&GraphConfig::default()).unwrap();
    snapshot.edges[0].weight = 205;

    let report = verifier().verify(&snapshot).unwrap();
    assert_eq!(report.status, Status::Failed);
    let check = report.check(CheckName::WeightConsistency).unwrap();
    assert_eq!(check.violation_count, 1);
    let ViolationDetail::WeightMismatch { expected, actual, .. } = &check.sample_violations[0] else {
        panic!("unexpected detail {:?}", check.sample_violations[0]);
    };
    assert_eq!((*expected, *actual), (496, 205));
}

#[test]
fn self_loop_is_rejected_before_edge_creation() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(index);
    let report = builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "JEFFREY EPSTEIN", SourceKind::Document, 5).unwrap(),
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 1).unwrap(),
        ])
        .unwrap();
    assert_eq!(report.self_loops_rejected, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.rejected[0].position, 0);
    assert_eq!(builder.edge_count(), 1);
}

#[test]
fn self_loop_that_slipped_through_is_flagged() {
    let a = CanonicalEntity::new("Jeffrey Epstein", EntityType::Person);
    let b = CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person);
    let mut edge = entigraph::Edge::new(a.id, a.id);
    edge.record(SourceKind::Document, 5);
    let snapshot = GraphSnapshot::new(vec![a, b], vec![edge]);

    let report = verifier().verify(&snapshot).unwrap();
    assert_eq!(report.failed_checks(), vec![CheckName::SelfLoopDetection]);
    assert!(report.integrity_error().is_none());
}

#[test]
fn unresolvable_batch_leaves_graph_untouched() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(Arc::clone(&index));
    let err = builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 2).unwrap(),
            CoOccurrence::new("Jeffrey Epstein", "Ghost Person", SourceKind::Correspondence, 1).unwrap(),
        ])
        .unwrap_err();

    let EntigraphError::Unresolvable(inner) = &err else {
        panic!("expected unresolvable reference, got {err:?}");
    };
    assert_eq!(inner.unresolved.len(), 1);
    assert_eq!(inner.unresolved[0].reference, "Ghost Person");
    assert!(err.is_batch_fatal());
    assert_eq!(builder.edge_count(), 0);
    assert_eq!(index.len().unwrap(), 2);
}

#[test]
fn cutoff_prunes_edges_then_isolated_nodes_and_still_passes() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell", "Leslie Wexner", "Jean-Luc Brunel"]);
    let mut builder = GraphBuilder::new(index);
    builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::FlightLog, 10).unwrap(),
            CoOccurrence::new("Jeffrey Epstein", "Leslie Wexner", SourceKind::Correspondence, 1).unwrap(),
        ])
        .unwrap();

    let snapshot = builder
        .snapshot(&GraphConfig {
            min_edge_weight: Some(5),
            ..GraphConfig::default()
        })
        .unwrap();
    assert_eq!(snapshot.edge_count(), 1);
    assert_eq!(snapshot.node_count(), 2);

    let report = verifier().verify(&snapshot).unwrap();
    assert_eq!(report.status, Status::Pass, "{report:#?}");
    let co = report.check(CheckName::CoOccurrenceValidity).unwrap();
    assert!(!co.fatal);
    assert_eq!(co.warning_count, 1);
    assert_eq!(report.warnings().len(), 1);
}

#[test]
fn dangling_endpoint_is_fatal() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(index);
    builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 3).unwrap(),
        ])
        .unwrap();
    let mut snapshot = builder.snapshot(&GraphConfig::default()).unwrap();
    snapshot.nodes.pop();

    let report = verifier().verify(&snapshot).unwrap();
    assert_eq!(report.status, Status::Failed);
    assert_eq!(report.checks.len(), 6);
    let err = report.integrity_error().unwrap();
    assert!(err.to_string().contains("network_integrity"));
}

#[test]
fn published_output_and_report_serialize() {
    let index = seeded_index(&["Jeffrey Epstein", "Ghislaine Maxwell"]);
    let mut builder = GraphBuilder::new(index);
    builder
        .apply_batch(&[
            CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 3).unwrap(),
        ])
        .unwrap();
    let snapshot = builder.snapshot(&GraphConfig::default()).unwrap();

    let output = serde_json::to_value(snapshot.to_output()).unwrap();
    assert_eq!(output["nodes"].as_array().unwrap().len(), 2);
    let edge = &output["edges"][0];
    assert_eq!(edge["weight"], 3);
    assert_eq!(edge["document_count"], 3);
    assert_eq!(edge["flight_log_count"], 0);
    assert!(edge.get("correspondence_count").is_none());

    let report = serde_json::to_value(verifier().verify(&snapshot).unwrap()).unwrap();
    assert_eq!(report["status"], "PASS");
    assert_eq!(report["checks"].as_array().unwrap().len(), 6);
    assert!(report["generated_at"].is_string());

    // A snapshot survives a round trip through its JSON form unchanged.
    let raw = serde_json::to_string(&snapshot).unwrap();
    let reloaded: GraphSnapshot = serde_json::from_str(&raw).unwrap();
    assert_eq!(reloaded.digest().unwrap(), snapshot.digest().unwrap());
}
