//! Durability tests for the directory-backed entity index.
//!
//! These tests verify that:
//! - Committed batches survive a restart
//! - Checksum mismatches are detected on load
//! - Persisted mappings violating index invariants are refused
//! - Only one process-level handle can own a directory

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use entigraph::config::EntigraphConfig;
use entigraph::pipeline::IngestPipeline;
use entigraph::storage::persistent::{index_file_name, INDEX_FILE, MANIFEST_FILE};
use entigraph::storage::{IndexStore, StorageError};
use entigraph::{EntigraphError, EntityType, Mention};

fn person(text: &str, doc: &str) -> Mention {
    Mention::new(text, EntityType::Person, doc, 0.9).unwrap()
}

fn open(dir: &std::path::Path) -> Result<IngestPipeline, EntigraphError> {
    let store = IndexStore::open(dir)?;
    IngestPipeline::open(Arc::new(store), &EntigraphConfig::default())
}

#[test]
fn committed_batches_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let pipeline = open(dir.path()).unwrap();
        pipeline
            .ingest_batch(&[person("Jeffrey Epstein", "d1"), person("J. Epstein", "d2")])
            .unwrap();
        let summary = pipeline.ingest_batch(&[person("Ghislaine Maxwell", "d3")]).unwrap();
        assert_eq!(summary.generation, Some(2));
    }

    let pipeline = open(dir.path()).unwrap();
    let index = pipeline.index();
    assert_eq!(index.len().unwrap(), 2);
    let epstein = index.lookup_exact("J. Epstein").unwrap().unwrap();
    assert_eq!(epstein.canonical_name, "Jeffrey Epstein");
    assert_eq!(epstein.mention_count, 2);

    // Generations keep counting across restarts.
    let summary = pipeline.ingest_batch(&[person("Leslie Wexner", "d4")]).unwrap();
    assert_eq!(summary.generation, Some(3));
}

#[test]
fn ids_are_stable_across_restarts() {
    let dir = tempdir().unwrap();
    let id = {
        let pipeline = open(dir.path()).unwrap();
        pipeline.ingest_batch(&[person("Ghislaine Maxwell", "d1")]).unwrap();
        pipeline.index().lookup_exact("Ghislaine Maxwell").unwrap().unwrap().id
    };
    let pipeline = open(dir.path()).unwrap();
    let reloaded = pipeline.index().get(id).unwrap().unwrap();
    assert_eq!(reloaded.canonical_name, "Ghislaine Maxwell");
}

#[test]
fn checksum_mismatch_is_fatal() {
    let dir = tempdir().unwrap();
    {
        let pipeline = open(dir.path()).unwrap();
        pipeline.ingest_batch(&[person("Ghislaine Maxwell", "d1")]).unwrap();
    }

    let path = dir.path().join(index_file_name(1));
    let tampered = fs::read_to_string(&path)
        .unwrap()
        .replace("Ghislaine Maxwell", "Ghislaine Maxwel");
    fs::write(&path, tampered).unwrap();

    let err = open(dir.path()).unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(matches!(err, EntigraphError::Storage(StorageError::Corrupted(_))));
}

#[test]
fn alias_conflict_in_persisted_mapping_is_refused() {
    let dir = tempdir().unwrap();
    let mapping = json!({
        "bill clinton": {
            "canonical_name": "Bill Clinton",
            "entity_type": "person",
            "aliases": ["President Clinton"],
            "mention_count": 3,
            "source_documents": ["d1"]
        },
        "william clinton": {
            "canonical_name": "William Clinton",
            "entity_type": "person",
            "aliases": ["President Clinton"],
            "mention_count": 1,
            "source_documents": ["d2"]
        }
    });
    fs::write(dir.path().join(INDEX_FILE), mapping.to_string()).unwrap();
    assert!(!dir.path().join(MANIFEST_FILE).exists());

    let err = open(dir.path()).unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(matches!(err, EntigraphError::Corruption(_)));
}

#[test]
fn interrupted_commit_reopens_at_previous_generation() {
    let dir = tempdir().unwrap();
    let manifest_path = dir.path().join(MANIFEST_FILE);
    let saved = {
        let pipeline = open(dir.path()).unwrap();
        pipeline.ingest_batch(&[person("Ghislaine Maxwell", "d1")]).unwrap();
        let saved = fs::read(&manifest_path).unwrap();
        pipeline.ingest_batch(&[person("Leslie Wexner", "d2")]).unwrap();
        saved
    };
    fs::write(&manifest_path, saved).unwrap();

    let pipeline = open(dir.path()).unwrap();
    assert_eq!(pipeline.index().len().unwrap(), 1);
    assert!(pipeline.index().lookup_exact("Leslie Wexner").unwrap().is_none());

    let summary = pipeline.ingest_batch(&[person("Leslie Wexner", "d2")]).unwrap();
    assert_eq!(summary.generation, Some(2));
    assert_eq!(summary.entity_count, 2);
}

#[test]
fn second_handle_is_locked_out() {
    let dir = tempdir().unwrap();
    let _first = IndexStore::open(dir.path()).unwrap();
    let err = IndexStore::open(dir.path()).unwrap_err();
    assert!(matches!(err, StorageError::Locked { .. }));
}
