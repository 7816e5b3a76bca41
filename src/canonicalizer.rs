//! Mention canonicalization.
//!
//! Clusters raw mentions into canonical entities. The core step is the pure
//! function [`canonicalize`]: it takes the current [`ClusterSet`] and one
//! mention and returns the updated set plus the [`Assignment`] it made, so
//! merge decisions can be exercised without an index.
//!
//! A mention joins the best-scoring existing cluster whose canonical name
//! scores at or above the threshold. Ties go to the higher score, then the
//! larger `mention_count`, then the earlier cluster. Otherwise it mints a new
//! cluster whose canonical name is the mention text. Canonical names never
//! change after minting; later variants only grow the alias set.

use serde::{Deserialize, Serialize};

use crate::config::CanonicalizerConfig;
use crate::entity::{CanonicalEntity, EntityId, Mention, RejectedRecord};
use crate::error::ValidationError;
use crate::similarity::similarity;

/// Ordered clusters produced so far. A cluster's ordinal is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSet {
    clusters: Vec<CanonicalEntity>,
}

impl ClusterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the set with already-canonical entities, in order.
    #[must_use]
    pub fn from_entities(entities: Vec<CanonicalEntity>) -> Self {
        Self { clusters: entities }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    #[must_use]
    pub fn get(&self, ordinal: usize) -> Option<&CanonicalEntity> {
        self.clusters.get(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalEntity> {
        self.clusters.iter()
    }

    #[must_use]
    pub fn into_entities(self) -> Vec<CanonicalEntity> {
        self.clusters
    }
}

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentKind {
    /// The mention started a new cluster.
    Minted,
    /// The mention joined an existing cluster at this score.
    Merged { score: f64 },
}

/// Cluster assignment for one mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Ordinal of the cluster within its [`ClusterSet`].
    pub cluster: usize,
    pub entity_id: EntityId,
    pub kind: AssignmentKind,
    /// True if the mention text became a new alias.
    pub new_alias: bool,
}

/// Where a mention should go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Join the cluster at this ordinal.
    Join { cluster: usize, score: f64 },
    /// Start a new cluster.
    Mint,
}

/// Decides where a mention belongs without changing anything.
///
/// # Errors
///
/// Returns a [`ValidationError`] for an invalid mention or one whose
/// confidence is below `config.min_confidence`.
pub fn place(
    clusters: &ClusterSet,
    mention: &Mention,
    config: &CanonicalizerConfig,
) -> Result<Placement, ValidationError> {
    mention.validate()?;
    if mention.confidence < config.min_confidence {
        return Err(ValidationError::BelowConfidenceFloor {
            value: mention.confidence,
            floor: config.min_confidence,
        });
    }

    let mut best: Option<(usize, f64, u64)> = None;
    for (ordinal, cluster) in clusters.clusters.iter().enumerate() {
        if !config.match_across_types && cluster.entity_type != mention.entity_type {
            continue;
        }
        let score = similarity(&mention.text, &cluster.canonical_name);
        if score < config.threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, best_score, best_count)) => {
                score > best_score || (score == best_score && cluster.mention_count > best_count)
            }
        };
        if better {
            best = Some((ordinal, score, cluster.mention_count));
        }
    }
    Ok(best.map_or(Placement::Mint, |(cluster, score, _)| Placement::Join {
        cluster,
        score,
    }))
}

impl ClusterSet {
    /// Applies a placement decided by [`place`] for this mention.
    fn apply(&mut self, placement: Placement, mention: &Mention) -> Assignment {
        let text = mention.text.trim();
        let document = mention.source_document.trim();
        if let Placement::Join { cluster: ordinal, score } = placement {
            if let Some(cluster) = self.clusters.get_mut(ordinal) {
                let new_alias = cluster.absorb_mention(text, document);
                return Assignment {
                    cluster: ordinal,
                    entity_id: cluster.id,
                    kind: AssignmentKind::Merged { score },
                    new_alias,
                };
            }
        }
        let entity = CanonicalEntity::new(text, mention.entity_type).with_source_document(document);
        let assignment = Assignment {
            cluster: self.clusters.len(),
            entity_id: entity.id,
            kind: AssignmentKind::Minted,
            new_alias: false,
        };
        self.clusters.push(entity);
        assignment
    }
}

/// Assigns one mention to a cluster.
///
/// Pure: the updated set is returned alongside the assignment made.
///
/// # Errors
///
/// See [`place`].
///
/// # Examples
///
/// ```
/// use entigraph::canonicalizer::{canonicalize, AssignmentKind, ClusterSet};
/// use entigraph::config::CanonicalizerConfig;
/// use entigraph::{EntityType, Mention};
///
/// let config = CanonicalizerConfig::default();
/// let first = Mention::new("Jeffrey Epstein", EntityType::Person, "doc-1", 0.9)?;
/// let second = Mention::new("Epstein, Jeffrey", EntityType::Person, "doc-2", 0.9)?;
///
/// let (clusters, a) = canonicalize(ClusterSet::new(), &first, &config)?;
/// let (clusters, b) = canonicalize(clusters, &second, &config)?;
/// assert_eq!(a.kind, AssignmentKind::Minted);
/// assert_eq!(b.cluster, a.cluster);
/// assert_eq!(clusters.len(), 1);
/// # Ok::<(), entigraph::ValidationError>(())
/// ```
pub fn canonicalize(
    clusters: ClusterSet,
    mention: &Mention,
    config: &CanonicalizerConfig,
) -> Result<(ClusterSet, Assignment), ValidationError> {
    let placement = place(&clusters, mention, config)?;
    let mut clusters = clusters;
    let assignment = clusters.apply(placement, mention);
    Ok((clusters, assignment))
}

/// Counters for one canonicalization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizationStats {
    pub mentions: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub minted: usize,
    pub merged: usize,
    pub clusters: usize,
}

/// Output of [`Canonicalizer::run`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalizationRun {
    pub clusters: ClusterSet,
    /// `(position, assignment)` for every accepted mention.
    pub assignments: Vec<(usize, Assignment)>,
    pub rejected: Vec<RejectedRecord>,
}

impl CanonicalizationRun {
    /// Summary counters.
    #[must_use]
    pub fn stats(&self) -> CanonicalizationStats {
        let minted = self
            .assignments
            .iter()
            .filter(|(_, a)| a.kind == AssignmentKind::Minted)
            .count();
        CanonicalizationStats {
            mentions: self.assignments.len() + self.rejected.len(),
            accepted: self.assignments.len(),
            rejected: self.rejected.len(),
            minted,
            merged: self.assignments.len() - minted,
            clusters: self.clusters.len(),
        }
    }
}

/// Batch driver around [`canonicalize`].
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    config: CanonicalizerConfig,
}

impl Canonicalizer {
    /// Creates a canonicalizer after validating the thresholds.
    pub fn new(config: CanonicalizerConfig) -> Result<Self, ValidationError> {
        for (name, value) in [
            ("canonicalizer.threshold", config.threshold),
            ("canonicalizer.min_confidence", config.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidThreshold {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &CanonicalizerConfig {
        &self.config
    }

    /// Clusters a batch from scratch.
    #[must_use]
    pub fn run(&self, mentions: &[Mention]) -> CanonicalizationRun {
        self.run_seeded(ClusterSet::new(), mentions)
    }

    /// Clusters a batch on top of existing clusters.
    ///
    /// Invalid mentions are rejected with their position and never abort the
    /// batch.
    #[must_use]
    pub fn run_seeded(&self, seed: ClusterSet, mentions: &[Mention]) -> CanonicalizationRun {
        let mut clusters = seed;
        let mut assignments = Vec::with_capacity(mentions.len());
        let mut rejected = Vec::new();

        for (position, mention) in mentions.iter().enumerate() {
            match place(&clusters, mention, &self.config) {
                Ok(placement) => {
                    let assignment = clusters.apply(placement, mention);
                    assignments.push((position, assignment));
                }
                Err(e) => {
                    tracing::debug!(position, error = %e, "mention rejected by canonicalizer");
                    rejected.push(RejectedRecord::new(position, &e));
                }
            }
        }

        let run = CanonicalizationRun {
            clusters,
            assignments,
            rejected,
        };
        let stats = run.stats();
        tracing::info!(
            mentions = stats.mentions,
            rejected = stats.rejected,
            minted = stats.minted,
            merged = stats.merged,
            clusters = stats.clusters,
            "canonicalized batch"
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    fn mention(text: &str) -> Mention {
        Mention::new(text, EntityType::Person, "doc-1", 0.9).unwrap()
    }

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(CanonicalizerConfig::default()).unwrap()
    }

    #[test]
    fn test_epstein_variants_form_one_cluster() {
        let mentions = vec![
            mention("Jeffrey Epstein"),
            mention("Epstein, Jeffrey"),
            mention("J. Epstein"),
        ];
        let run = canonicalizer().run(&mentions);

        assert_eq!(run.clusters.len(), 1);
        let entity = run.clusters.get(0).unwrap();
        assert_eq!(entity.canonical_name, "Jeffrey Epstein");
        assert_eq!(entity.mention_count, 3);
        assert_eq!(entity.aliases.len(), 2);
        assert!(entity.aliases.contains("Epstein, Jeffrey"));
        assert!(entity.aliases.contains("J. Epstein"));
    }

    #[test]
    fn test_first_seen_name_stays_canonical() {
        let mentions = vec![
            mention("J. Epstein"),
            mention("Jeffrey Epstein"),
            mention("Jeffrey Epstein"),
            mention("Jeffrey Epstein"),
        ];
        let run = canonicalizer().run(&mentions);
        let entity = run.clusters.get(0).unwrap();
        assert_eq!(entity.canonical_name, "J. Epstein");
        assert_eq!(entity.mention_count, 4);
        assert_eq!(entity.aliases.len(), 1);
    }

    #[test]
    fn test_distinct_people_stay_apart() {
        let mentions = vec![mention("Jeffrey Epstein"), mention("Mark Epstein")];
        let run = canonicalizer().run(&mentions);
        assert_eq!(run.clusters.len(), 2);
        assert_eq!(run.stats().minted, 2);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let a = "Jeffrey Epstein";
        let b = "J. Epstein";
        let score = similarity(a, b);

        let at = Canonicalizer::new(CanonicalizerConfig {
            threshold: score,
            ..CanonicalizerConfig::default()
        })
        .unwrap();
        assert_eq!(at.run(&[mention(a), mention(b)]).clusters.len(), 1);

        let above = Canonicalizer::new(CanonicalizerConfig {
            threshold: score + 0.01,
            ..CanonicalizerConfig::default()
        })
        .unwrap();
        assert_eq!(above.run(&[mention(a), mention(b)]).clusters.len(), 2);
    }

    #[test]
    fn test_types_are_not_mixed_by_default() {
        let mentions = vec![
            Mention::new("Epstein", EntityType::Person, "doc-1", 0.9).unwrap(),
            Mention::new("Epstein", EntityType::Organization, "doc-2", 0.9).unwrap(),
        ];
        assert_eq!(canonicalizer().run(&mentions).clusters.len(), 2);

        let across = Canonicalizer::new(CanonicalizerConfig {
            match_across_types: true,
            ..CanonicalizerConfig::default()
        })
        .unwrap();
        assert_eq!(across.run(&mentions).clusters.len(), 1);
    }

    #[test]
    fn test_tie_prefers_larger_cluster_then_earlier() {
        let seed = ClusterSet::from_entities(vec![
            CanonicalEntity::new("Epstein Jeffrey", EntityType::Person),
            CanonicalEntity::new("Jeffrey Epstein", EntityType::Person).with_mention_count(7),
        ]);
        let config = CanonicalizerConfig::default();
        let (_, assignment) = canonicalize(seed.clone(), &mention("Jeffrey Epstein"), &config).unwrap();
        assert_eq!(assignment.cluster, 1);

        let even = ClusterSet::from_entities(vec![
            CanonicalEntity::new("Epstein Jeffrey", EntityType::Person),
            CanonicalEntity::new("Jeffrey Epstein", EntityType::Person),
        ]);
        let (_, assignment) = canonicalize(even, &mention("Jeffrey Epstein"), &config).unwrap();
        assert_eq!(assignment.cluster, 0);
    }

    #[test]
    fn test_rejections_do_not_abort_batch() {
        let mut blank = mention("placeholder");
        blank.text = "   ".to_string();
        let low = Mention::new("Ghislaine Maxwell", EntityType::Person, "doc-2", 0.1).unwrap();

        let canonicalizer = Canonicalizer::new(CanonicalizerConfig {
            min_confidence: 0.5,
            ..CanonicalizerConfig::default()
        })
        .unwrap();
        let run = canonicalizer.run(&[mention("Jeffrey Epstein"), blank, low, mention("J. Epstein")]);

        let stats = run.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.clusters, 1);
        assert_eq!(run.rejected[0].position, 1);
        assert_eq!(run.rejected[1].position, 2);
        assert!(run.rejected[1].reason.contains("floor"));
    }

    #[test]
    fn test_rerun_on_canonical_names_is_stable() {
        let mentions = vec![
            mention("Jeffrey Epstein"),
            mention("Ghislaine Maxwell"),
            mention("J. Epstein"),
            mention("G. Maxwell"),
            mention("Bill Clinton"),
        ];
        let canonicalizer = canonicalizer();
        let first = canonicalizer.run(&mentions);

        let names: Vec<Mention> = first.clusters.iter().map(|e| mention(&e.canonical_name)).collect();
        let fresh = canonicalizer.run(&names);
        assert_eq!(fresh.clusters.len(), first.clusters.len());

        let seeded = canonicalizer.run_seeded(first.clusters.clone(), &names);
        assert_eq!(seeded.clusters.len(), first.clusters.len());
        for (before, after) in first.clusters.iter().zip(seeded.clusters.iter()) {
            assert_eq!(before.aliases, after.aliases);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Canonicalizer::new(CanonicalizerConfig {
            threshold: -0.1,
            ..CanonicalizerConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidThreshold { .. }));
    }
}
