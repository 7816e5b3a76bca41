//! Property tests for the resolution and graph invariants.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use entigraph::config::{EntigraphConfig, GraphConfig, VerifierConfig};
use entigraph::crossref::{Candidate, CrossReferencer};
use entigraph::graph::{CoOccurrence, GraphBuilder, SourceKind};
use entigraph::pipeline::IngestPipeline;
use entigraph::similarity::similarity;
use entigraph::verifier::GraphVerifier;
use entigraph::{EntityIndex, EntityType, Mention};

const FIRST: &[&str] = &["Jeffrey", "J.", "Ghislaine", "G.", "Leslie", "Bill", "William", "Mark"];
const LAST: &[&str] = &["Epstein", "Maxwell", "Wexner", "Clinton", "Brunel"];

fn name() -> impl Strategy<Value = String> {
    (
        prop::sample::select(FIRST),
        prop::sample::select(LAST),
        any::<bool>(),
    )
        .prop_map(|(first, last, inverted)| {
            if inverted {
                format!("{last}, {first}")
            } else {
                format!("{first} {last}")
            }
        })
}

fn mentions() -> impl Strategy<Value = Vec<Mention>> {
    prop::collection::vec((name(), 0usize..4), 1..24).prop_map(|items| {
        items
            .into_iter()
            .map(|(text, doc)| {
                Mention::new(text, EntityType::Person, format!("doc-{doc}"), 0.9).unwrap()
            })
            .collect()
    })
}

fn kind() -> impl Strategy<Value = SourceKind> {
    prop::sample::select(SourceKind::ALL.to_vec())
}

fn ingest(batches: &[Vec<Mention>]) -> IngestPipeline {
    let pipeline =
        IngestPipeline::new(Arc::new(EntityIndex::new()), &EntigraphConfig::default()).unwrap();
    for batch in batches {
        pipeline.ingest_batch(batch).unwrap();
    }
    pipeline
}

proptest! {
    #[test]
    fn similarity_is_symmetric_and_bounded(a in name(), b in name()) {
        let ab = similarity(&a, &b);
        let ba = similarity(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((similarity(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn every_mention_resolves_and_aliases_stay_disjoint(
        batches in prop::collection::vec(mentions(), 1..4),
    ) {
        let pipeline = ingest(&batches);
        let index = pipeline.index();
        index.check_invariants().unwrap();

        let entities = index.entities().unwrap();
        let names: BTreeSet<&str> = entities.iter().map(|e| e.normalized_name.as_str()).collect();
        prop_assert_eq!(names.len(), entities.len());

        let total: u64 = entities.iter().map(|e| e.mention_count).sum();
        let received: usize = batches.iter().map(Vec::len).sum();
        prop_assert_eq!(total, received as u64);

        for mention in batches.iter().flatten() {
            prop_assert!(index.lookup_exact(&mention.text).unwrap().is_some(), "{} unresolved", mention.text);
        }
    }

    #[test]
    fn cross_reference_partitions_completely(
        seed in mentions(),
        candidates in prop::collection::vec(name(), 0..16),
    ) {
        let pipeline = ingest(&[seed]);
        let candidates: Vec<Candidate> = candidates.into_iter().map(Candidate::new).collect();
        let result = CrossReferencer::default()
            .cross_reference(pipeline.index(), &candidates)
            .unwrap();

        let matched: BTreeSet<usize> = result.matched.iter().map(|m| m.position).collect();
        let new: BTreeSet<usize> = result.new.iter().map(|n| n.position).collect();
        prop_assert!(matched.is_disjoint(&new));
        prop_assert_eq!(matched.len() + new.len(), candidates.len());
        prop_assert_eq!(result.stats.total, candidates.len());
    }

    #[test]
    fn built_graphs_have_no_self_loops_and_derived_weights(
        seed in mentions(),
        pairs in prop::collection::vec((0usize..32, 0usize..32, kind(), 1i64..50), 0..40),
    ) {
        let pipeline = ingest(&[seed]);
        let entities = pipeline.index().entities().unwrap();
        let records: Vec<CoOccurrence> = pairs
            .into_iter()
            .map(|(a, b, kind, n)| {
                let a = &entities[a % entities.len()];
                let b = &entities[b % entities.len()];
                CoOccurrence::between(a.id, b.id, kind, n).unwrap()
            })
            .collect();

        let mut builder = GraphBuilder::new(Arc::clone(pipeline.index()));
        let report = builder.apply_batch(&records).unwrap();
        prop_assert_eq!(report.applied + report.rejected.len(), records.len());

        let snapshot = builder.snapshot(&GraphConfig::default()).unwrap();
        for edge in &snapshot.edges {
            prop_assert!(edge.source_id < edge.target_id);
            prop_assert_eq!(edge.weight, edge.documented_weight());
        }

        let report = GraphVerifier::new(VerifierConfig::default())
            .unwrap()
            .verify(&snapshot)
            .unwrap();
        prop_assert!(report.passed(), "{:#?}", report);
    }
}
