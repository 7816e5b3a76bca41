//! Cross-referencing new batches against the entity index.
//!
//! Read-only: every candidate is looked up exactly first, then fuzzily, and
//! lands in exactly one of `matched` or `new`. Many batches may be
//! cross-referenced concurrently against one shared index.

use serde::{Deserialize, Serialize};

use crate::config::CrossReferenceConfig;
use crate::entity::{CanonicalEntity, EntityId, EntityType, Mention};
use crate::error::{EntigraphResult, ValidationError};
use crate::index::{EntityIndex, FuzzyQuery};

/// A name to classify, with its type when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub entity_type: Option<EntityType>,
}

impl Candidate {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: None,
        }
    }

    #[must_use]
    pub const fn with_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }
}

impl From<&Mention> for Candidate {
    fn from(mention: &Mention) -> Self {
        Self::new(mention.text.trim()).with_type(mention.entity_type)
    }
}

impl From<&CanonicalEntity> for Candidate {
    fn from(entity: &CanonicalEntity) -> Self {
        Self::new(entity.canonical_name.clone()).with_type(entity.entity_type)
    }
}

/// How a match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Canonical name or alias after normalization.
    Exact,
    /// Similarity at or above the threshold.
    Fuzzy,
}

/// A candidate matched to an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedCandidate {
    /// Position of the candidate in its batch.
    pub position: usize,
    pub candidate: Candidate,
    pub entity_id: EntityId,
    pub canonical_name: String,
    pub method: MatchMethod,
    /// 1.0 for exact matches, the similarity score for fuzzy ones.
    pub confidence: f64,
}

/// A candidate with no counterpart in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCandidate {
    pub position: usize,
    pub candidate: Candidate,
}

/// Summary counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceStats {
    pub total: usize,
    pub matched: usize,
    pub new: usize,
    /// `matched / total`, 0.0 for an empty batch.
    pub match_rate: f64,
}

/// Partition of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceResult {
    pub matched: Vec<MatchedCandidate>,
    pub new: Vec<NewCandidate>,
    pub stats: CrossReferenceStats,
}

/// Classifies candidates against a shared index.
#[derive(Debug, Clone, Default)]
pub struct CrossReferencer {
    config: CrossReferenceConfig,
}

impl CrossReferencer {
    /// Creates a cross-referencer after validating the threshold.
    pub fn new(config: CrossReferenceConfig) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(ValidationError::InvalidThreshold {
                name: "cross_reference.threshold".to_string(),
                value: config.threshold,
            });
        }
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &CrossReferenceConfig {
        &self.config
    }

    /// Looks up a single candidate. `Ok(None)` means it is new.
    pub fn match_one(
        &self,
        index: &EntityIndex,
        position: usize,
        candidate: &Candidate,
    ) -> EntigraphResult<Option<MatchedCandidate>> {
        if let Some(entity) = index.lookup_exact(&candidate.name)? {
            return Ok(Some(MatchedCandidate {
                position,
                candidate: candidate.clone(),
                entity_id: entity.id,
                canonical_name: entity.canonical_name,
                method: MatchMethod::Exact,
                confidence: 1.0,
            }));
        }

        let mut query = FuzzyQuery::new(&candidate.name, self.config.threshold)
            .with_aliases(self.config.include_aliases);
        if let Some(entity_type) = candidate.entity_type {
            query = query.with_entity_type(entity_type);
        }
        Ok(index.search(&query)?.map(|hit| MatchedCandidate {
            position,
            candidate: candidate.clone(),
            entity_id: hit.entity.id,
            canonical_name: hit.entity.canonical_name,
            method: MatchMethod::Fuzzy,
            confidence: hit.score,
        }))
    }

    /// Partitions a batch into matched and new candidates.
    ///
    /// # Examples
    ///
    /// ```
    /// use entigraph::crossref::{Candidate, CrossReferencer};
    /// use entigraph::{CanonicalEntity, EntityIndex, EntityType};
    ///
    /// let index = EntityIndex::new();
    /// index.upsert(CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person))?;
    ///
    /// let result = CrossReferencer::default().cross_reference(
    ///     &index,
    ///     &[Candidate::new("G. Maxwell"), Candidate::new("Leslie Wexner")],
    /// )?;
    /// assert_eq!(result.stats.matched, 1);
    /// assert_eq!(result.stats.new, 1);
    /// assert_eq!(result.stats.match_rate, 0.5);
    /// # Ok::<(), entigraph::EntigraphError>(())
    /// ```
    #[tracing::instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
    pub fn cross_reference(
        &self,
        index: &EntityIndex,
        candidates: &[Candidate],
    ) -> EntigraphResult<CrossReferenceResult> {
        let mut matched = Vec::new();
        let mut new = Vec::new();

        for (position, candidate) in candidates.iter().enumerate() {
            match self.match_one(index, position, candidate)? {
                Some(hit) => matched.push(hit),
                None => new.push(NewCandidate {
                    position,
                    candidate: candidate.clone(),
                }),
            }
        }

        let total = candidates.len();
        let match_rate = if total == 0 {
            0.0
        } else {
            matched.len() as f64 / total as f64
        };
        let stats = CrossReferenceStats {
            total,
            matched: matched.len(),
            new: new.len(),
            match_rate,
        };
        tracing::debug!(
            total,
            matched = stats.matched,
            new = stats.new,
            match_rate,
            "cross-referenced batch"
        );
        Ok(CrossReferenceResult { matched, new, stats })
    }

    /// Cross-references raw mentions.
    pub fn cross_reference_mentions(
        &self,
        index: &EntityIndex,
        mentions: &[Mention],
    ) -> EntigraphResult<CrossReferenceResult> {
        let candidates: Vec<Candidate> = mentions.iter().map(Candidate::from).collect();
        self.cross_reference(index, &candidates)
    }

    /// Cross-references canonicalized clusters.
    pub fn cross_reference_entities(
        &self,
        index: &EntityIndex,
        entities: &[CanonicalEntity],
    ) -> EntigraphResult<CrossReferenceResult> {
        let candidates: Vec<Candidate> = entities.iter().map(Candidate::from).collect();
        self.cross_reference(index, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_index() -> EntityIndex {
        let index = EntityIndex::new();
        index
            .upsert(
                CanonicalEntity::new("Jeffrey Epstein", EntityType::Person)
                    .with_alias("Epstein, Jeffrey"),
            )
            .unwrap();
        index
            .upsert(CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person))
            .unwrap();
        index
            .upsert(CanonicalEntity::new("Acme Holdings", EntityType::Organization))
            .unwrap();
        index
    }

    #[test]
    fn test_exact_then_fuzzy() {
        let index = seeded_index();
        let result = CrossReferencer::default()
            .cross_reference(
                &index,
                &[
                    Candidate::new("EPSTEIN, JEFFREY"),
                    Candidate::new("J. Epstein").with_type(EntityType::Person),
                    Candidate::new("Prince Andrew").with_type(EntityType::Person),
                ],
            )
            .unwrap();

        assert_eq!(result.matched.len(), 2);
        assert_eq!(result.matched[0].method, MatchMethod::Exact);
        assert_eq!(result.matched[0].confidence, 1.0);
        assert_eq!(result.matched[1].method, MatchMethod::Fuzzy);
        assert_eq!(result.matched[1].canonical_name, "Jeffrey Epstein");
        assert_eq!(result.new.len(), 1);
        assert_eq!(result.new[0].position, 2);
    }

    #[test]
    fn test_partition_is_complete() {
        let index = seeded_index();
        let names = ["Acme Holdings", "Acme Holding", "Nobody", "", "G Maxwell"];
        let candidates: Vec<Candidate> = names.iter().map(|n| Candidate::new(*n)).collect();
        let result = CrossReferencer::default().cross_reference(&index, &candidates).unwrap();
        assert_eq!(result.stats.total, names.len());
        assert_eq!(result.stats.matched + result.stats.new, result.stats.total);
    }

    #[test]
    fn test_typed_candidate_skips_other_types() {
        let index = seeded_index();
        let result = CrossReferencer::default()
            .cross_reference(&index, &[Candidate::new("Acme Holding").with_type(EntityType::Person)])
            .unwrap();
        assert_eq!(result.stats.new, 1);
    }

    #[test]
    fn test_empty_batch_rate_is_zero() {
        let result = CrossReferencer::default()
            .cross_reference(&EntityIndex::new(), &[])
            .unwrap();
        assert_eq!(result.stats.match_rate, 0.0);
    }

    #[test]
    fn test_does_not_mutate_index() {
        let index = seeded_index();
        let before = index.to_persisted().unwrap();
        let mentions = vec![Mention::new("Jeff Epstein", EntityType::Person, "d9", 0.8).unwrap()];
        CrossReferencer::default()
            .cross_reference_mentions(&index, &mentions)
            .unwrap();
        assert_eq!(index.to_persisted().unwrap(), before);
    }

    #[test]
    fn test_invalid_threshold() {
        let config = CrossReferenceConfig {
            threshold: 2.0,
            ..CrossReferenceConfig::default()
        };
        assert!(CrossReferencer::new(config).is_err());
    }
}
