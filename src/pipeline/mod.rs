//! Incremental ingestion.
//!
//! A batch goes through two phases:
//!
//! 1. **prepare** (read-only): canonicalize the mentions, then cross-reference
//!    every resulting cluster against the index.
//! 2. **commit** (writes): fold matched clusters into their entity, upsert new
//!    clusters, and write the index back through the persistence backend.
//!
//! Prepare may run for many batches at once; commits are serialized by the
//! index's writer lock, or by the single writer thread of
//! [`ResolutionRuntime`]. Each upsert is atomic. A failed commit keeps the
//! upserts that already landed.

mod runtime;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use runtime::{JobHandle, ResolutionRuntime};

use crate::canonicalizer::{CanonicalizationRun, Canonicalizer};
use crate::config::EntigraphConfig;
use crate::crossref::{Candidate, CrossReferenceResult, CrossReferencer};
use crate::entity::{CanonicalEntity, Mention, RejectedRecord};
use crate::error::{EntigraphError, EntigraphResult};
use crate::index::EntityIndex;
use crate::storage::{CommitReceipt, IndexPersistence};

/// Output of the read-only phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedBatch {
    pub canonicalization: CanonicalizationRun,
    /// Cross-reference of the clusters, by cluster ordinal.
    pub cross_reference: CrossReferenceResult,
}

/// Counters for one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub mentions_received: usize,
    pub mentions_accepted: usize,
    pub mentions_rejected: usize,
    pub rejected: Vec<RejectedRecord>,
    pub clusters: usize,
    pub matched: usize,
    pub new_entities: usize,
    /// Pre-existing entities collapsed by alias conflicts during the commit.
    pub merges: usize,
    pub entity_count: usize,
    /// Persistence generation written by this commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

/// Canonicalize, cross-reference and commit mention batches.
pub struct IngestPipeline {
    index: Arc<EntityIndex>,
    canonicalizer: Canonicalizer,
    cross_referencer: CrossReferencer,
    persistence: Option<Arc<dyn IndexPersistence>>,
}

impl fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("index", &self.index)
            .field("canonicalizer", &self.canonicalizer)
            .field("cross_referencer", &self.cross_referencer)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl IngestPipeline {
    /// Creates a pipeline over an existing index without persistence.
    pub fn new(index: Arc<EntityIndex>, config: &EntigraphConfig) -> EntigraphResult<Self> {
        config.validate()?;
        Ok(Self {
            index,
            canonicalizer: Canonicalizer::new(config.canonicalizer.clone())?,
            cross_referencer: CrossReferencer::new(config.cross_reference.clone())?,
            persistence: None,
        })
    }

    /// Loads the index from `persistence` and writes back after each commit.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the persisted index fails its integrity
    /// checks.
    pub fn open(
        persistence: Arc<dyn IndexPersistence>,
        config: &EntigraphConfig,
    ) -> EntigraphResult<Self> {
        let index = match persistence.load()? {
            Some(persisted) => EntityIndex::from_persisted(&persisted)?,
            None => EntityIndex::new(),
        };
        tracing::info!(entities = index.len()?, "loaded entity index");
        let mut pipeline = Self::new(Arc::new(index), config)?;
        pipeline.persistence = Some(persistence);
        Ok(pipeline)
    }

    #[must_use]
    pub fn index(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    #[must_use]
    pub const fn cross_referencer(&self) -> &CrossReferencer {
        &self.cross_referencer
    }

    /// Read-only phase.
    pub fn prepare(&self, mentions: &[Mention]) -> EntigraphResult<PreparedBatch> {
        let canonicalization = self.canonicalizer.run(mentions);
        let clusters: Vec<CanonicalEntity> = canonicalization.clusters.iter().cloned().collect();
        let cross_reference = self
            .cross_referencer
            .cross_reference_entities(&self.index, &clusters)?;
        Ok(PreparedBatch {
            canonicalization,
            cross_reference,
        })
    }

    /// Write phase.
    ///
    /// Clusters the prepare phase found no match for are looked up once more
    /// against the current index, so batches prepared concurrently converge.
    #[tracing::instrument(level = "debug", skip_all, fields(clusters = batch.canonicalization.clusters.len()))]
    pub fn commit(&self, batch: PreparedBatch) -> EntigraphResult<IngestSummary> {
        let stats = batch.canonicalization.stats();
        let mut summary = IngestSummary {
            mentions_received: stats.mentions,
            mentions_accepted: stats.accepted,
            mentions_rejected: stats.rejected,
            clusters: stats.clusters,
            ..IngestSummary::default()
        };

        let clusters = batch.canonicalization.clusters.into_entities();
        let mut matches = vec![None; clusters.len()];
        for hit in batch.cross_reference.matched {
            if let Some(slot) = matches.get_mut(hit.position) {
                *slot = Some(hit);
            }
        }

        for (position, (cluster, hit)) in clusters.into_iter().zip(matches).enumerate() {
            // A cluster classified as new may have been committed by another
            // batch since prepare ran.
            let hit = match hit {
                Some(hit) => Some(hit),
                None => self.cross_referencer.match_one(
                    &self.index,
                    position,
                    &Candidate::from(&cluster),
                )?,
            };
            let record = match hit {
                Some(hit) => {
                    summary.matched += 1;
                    tracing::debug!(
                        cluster = %cluster.canonical_name,
                        entity = %hit.canonical_name,
                        confidence = hit.confidence,
                        "folding cluster into existing entity"
                    );
                    fold_into(&hit.canonical_name, cluster)
                }
                None => {
                    summary.new_entities += 1;
                    cluster
                }
            };
            let outcome = self.index.upsert(record)?;
            summary.merges += outcome.absorbed_count();
        }

        summary.rejected = batch.canonicalization.rejected;
        summary.entity_count = self.index.len()?;
        if let Some(receipt) = self.persist()? {
            summary.generation = Some(receipt.generation);
        }

        tracing::info!(
            mentions = summary.mentions_received,
            rejected = summary.mentions_rejected,
            matched = summary.matched,
            new = summary.new_entities,
            merges = summary.merges,
            entities = summary.entity_count,
            "committed mention batch"
        );
        Ok(summary)
    }

    /// Prepare and commit in one call.
    pub fn ingest_batch(&self, mentions: &[Mention]) -> EntigraphResult<IngestSummary> {
        let prepared = self.prepare(mentions)?;
        self.commit(prepared)
    }

    /// Writes the index through the persistence backend, if any.
    pub fn persist(&self) -> EntigraphResult<Option<CommitReceipt>> {
        let Some(persistence) = self.persistence.as_ref() else {
            return Ok(None);
        };
        let persisted = self.index.to_persisted()?;
        persistence
            .commit(&persisted)
            .map(Some)
            .map_err(EntigraphError::from)
    }
}

/// Re-labels a cluster so its upsert lands on the matched entity. The
/// cluster's own canonical name is kept as an alias.
fn fold_into(canonical_name: &str, cluster: CanonicalEntity) -> CanonicalEntity {
    let mut record = CanonicalEntity::new(canonical_name, cluster.entity_type)
        .with_mention_count(cluster.mention_count);
    record.add_alias(cluster.canonical_name);
    for alias in cluster.aliases {
        record.add_alias(alias);
    }
    record.source_documents = cluster.source_documents;
    record
}
