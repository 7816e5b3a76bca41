//! The entity index.
//!
//! A single shared store of [`CanonicalEntity`] records keyed by
//! `normalized_name`, with a secondary claim table mapping every normalized
//! alias to the entity that owns it. Reads take a shared lock; `upsert` takes
//! the exclusive lock for its whole duration, so each upsert is atomic and
//! never interleaves with a lookup.
//!
//! Invariants held after every call:
//!
//! - every `normalized_name` maps to exactly one entity
//! - every normalized surface form is claimed by at most one entity
//!
//! An upsert whose names collide with more than one existing entity merges
//! them. The absorbed entities keep a redirect to the survivor, so ids handed
//! out earlier still resolve.

mod persisted;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

pub use persisted::{PersistedEntity, PersistedIndex};

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::error::{EntigraphError, EntigraphResult, IndexCorruptionError, ValidationError};
use crate::similarity::{normalize_name, similarity};
use crate::storage::StorageError;

/// Maximum redirect chain length followed when resolving merged ids.
const MAX_REDIRECT_HOPS: usize = 128;

fn lock_err(context: &'static str) -> EntigraphError {
    EntigraphError::Storage(StorageError::Poisoned {
        context: context.to_string(),
    })
}

#[derive(Debug, Default)]
struct IndexState {
    by_key: BTreeMap<String, CanonicalEntity>,
    by_id: HashMap<EntityId, String>,
    /// normalized surface form -> owning key
    claims: HashMap<String, String>,
    merged_into: HashMap<EntityId, EntityId>,
}

fn resolve_canonical_id(state: &IndexState, id: EntityId) -> EntigraphResult<EntityId> {
    let mut current = id;
    for _ in 0..MAX_REDIRECT_HOPS {
        let Some(next) = state.merged_into.get(&current).copied() else {
            return Ok(current);
        };
        if next == current {
            return Err(EntigraphError::internal("entity merge map contains a self-cycle"));
        }
        current = next;
    }
    Err(EntigraphError::internal(
        "entity merge map resolution exceeded hop limit",
    ))
}

fn claim_all(state: &mut IndexState, entity: &CanonicalEntity) {
    for key in entity.claimed_keys() {
        state.claims.insert(key, entity.normalized_name.clone());
    }
}

/// Result of an [`EntityIndex::upsert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// A new entity was created.
    Inserted { id: EntityId },
    /// The entity was folded into an existing one. `absorbed` lists further
    /// entities merged away because they claimed one of its names.
    Merged { id: EntityId, absorbed: Vec<EntityId> },
}

impl UpsertOutcome {
    /// Id of the entity that now holds the upserted record.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        match self {
            Self::Inserted { id } | Self::Merged { id, .. } => *id,
        }
    }

    /// Number of pre-existing entities removed by this upsert.
    #[must_use]
    pub fn absorbed_count(&self) -> usize {
        match self {
            Self::Inserted { .. } => 0,
            Self::Merged { absorbed, .. } => absorbed.len(),
        }
    }
}

/// Parameters for a fuzzy lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyQuery<'a> {
    pub name: &'a str,
    pub threshold: f64,
    /// Score aliases as well as canonical names.
    pub include_aliases: bool,
    /// Restrict candidates to one entity type.
    pub entity_type: Option<EntityType>,
}

impl<'a> FuzzyQuery<'a> {
    /// Query over canonical names and aliases of every type.
    #[must_use]
    pub const fn new(name: &'a str, threshold: f64) -> Self {
        Self {
            name,
            threshold,
            include_aliases: true,
            entity_type: None,
        }
    }

    #[must_use]
    pub const fn with_aliases(mut self, include_aliases: bool) -> Self {
        self.include_aliases = include_aliases;
        self
    }

    #[must_use]
    pub const fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }
}

/// Best fuzzy match for a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub entity: CanonicalEntity,
    pub score: f64,
    /// The surface form that produced `score`.
    pub matched_form: String,
}

/// Thread-safe, single-writer entity index.
///
/// # Examples
///
/// ```
/// use entigraph::{CanonicalEntity, EntityIndex, EntityType};
///
/// let index = EntityIndex::new();
/// index.upsert(CanonicalEntity::new("Jeffrey Epstein", EntityType::Person).with_alias("J. Epstein"))?;
///
/// let found = index.lookup_exact("j. epstein")?.unwrap();
/// assert_eq!(found.canonical_name, "Jeffrey Epstein");
///
/// let fuzzy = index.lookup_fuzzy("Epstein, Jeffrey", 0.85)?.unwrap();
/// assert_eq!(fuzzy.score, 1.0);
/// # Ok::<(), entigraph::EntigraphError>(())
/// ```
#[derive(Debug, Default)]
pub struct EntityIndex {
    state: RwLock<IndexState>,
}

impl EntityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    pub fn len(&self) -> EntigraphResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("index.len"))?;
        Ok(state.by_key.len())
    }

    /// Returns true if the index holds no entities.
    pub fn is_empty(&self) -> EntigraphResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Follows merge redirects to the live id.
    pub fn resolve_id(&self, id: EntityId) -> EntigraphResult<EntityId> {
        let state = self.state.read().map_err(|_| lock_err("index.resolve_id"))?;
        resolve_canonical_id(&state, id)
    }

    /// Fetches an entity by id, following merge redirects.
    pub fn get(&self, id: EntityId) -> EntigraphResult<Option<CanonicalEntity>> {
        let state = self.state.read().map_err(|_| lock_err("index.get"))?;
        let canonical = resolve_canonical_id(&state, id)?;
        Ok(state
            .by_id
            .get(&canonical)
            .and_then(|key| state.by_key.get(key))
            .cloned())
    }

    /// Exact lookup by canonical name or alias, after normalization.
    pub fn lookup_exact(&self, name: &str) -> EntigraphResult<Option<CanonicalEntity>> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Ok(None);
        }
        let state = self.state.read().map_err(|_| lock_err("index.lookup_exact"))?;
        Ok(state
            .claims
            .get(&key)
            .and_then(|owner| state.by_key.get(owner))
            .cloned())
    }

    /// Resolves a co-occurrence reference: an entity id string, or else a
    /// surface name.
    pub fn resolve_reference(&self, reference: &str) -> EntigraphResult<Option<CanonicalEntity>> {
        if let Ok(id) = reference.parse::<EntityId>() {
            if let Some(entity) = self.get(id)? {
                return Ok(Some(entity));
            }
        }
        self.lookup_exact(reference)
    }

    /// Best match over canonical names and aliases at or above `threshold`.
    ///
    /// Returns `Ok(None)` when nothing qualifies.
    pub fn lookup_fuzzy(&self, name: &str, threshold: f64) -> EntigraphResult<Option<FuzzyMatch>> {
        self.search(&FuzzyQuery::new(name, threshold))
    }

    /// Fuzzy lookup with explicit options.
    ///
    /// Ties on score go to the larger `mention_count`, then to the smaller
    /// normalized key.
    pub fn search(&self, query: &FuzzyQuery<'_>) -> EntigraphResult<Option<FuzzyMatch>> {
        if !(0.0..=1.0).contains(&query.threshold) {
            return Err(ValidationError::InvalidThreshold {
                name: "lookup threshold".to_string(),
                value: query.threshold,
            }
            .into());
        }
        if query.name.trim().is_empty() {
            return Ok(None);
        }

        let state = self.state.read().map_err(|_| lock_err("index.search"))?;
        let mut best: Option<(f64, &CanonicalEntity, &str)> = None;

        for entity in state.by_key.values() {
            if query.entity_type.is_some_and(|t| t != entity.entity_type) {
                continue;
            }
            let forms: Box<dyn Iterator<Item = &str>> = if query.include_aliases {
                Box::new(entity.surface_forms())
            } else {
                Box::new(std::iter::once(entity.canonical_name.as_str()))
            };

            let mut entity_best: Option<(f64, &str)> = None;
            for form in forms {
                let score = similarity(query.name, form);
                if entity_best.map_or(true, |(s, _)| score > s) {
                    entity_best = Some((score, form));
                }
            }
            let Some((score, form)) = entity_best else {
                continue;
            };
            if score < query.threshold {
                continue;
            }

            let better = match best {
                None => true,
                Some((best_score, best_entity, _)) => {
                    score > best_score
                        || (score == best_score && entity.mention_count > best_entity.mention_count)
                }
            };
            if better {
                best = Some((score, entity, form));
            }
        }

        Ok(best.map(|(score, entity, form)| FuzzyMatch {
            entity: entity.clone(),
            score,
            matched_form: form.to_string(),
        }))
    }

    /// Inserts an entity or merges it into the entities that already claim
    /// its names.
    ///
    /// Merging unions aliases and provenance and sums mention counts. When the
    /// incoming names are claimed by several distinct entities, all of them
    /// collapse into one: the entity owning the incoming key if there is one,
    /// else the one with the largest `mention_count`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an empty name or zero mention count.
    pub fn upsert(&self, entity: CanonicalEntity) -> EntigraphResult<UpsertOutcome> {
        let mut incoming = entity;
        incoming.canonical_name = incoming.canonical_name.trim().to_string();
        incoming.normalized_name = normalize_name(&incoming.canonical_name);
        if incoming.normalized_name.is_empty() {
            return Err(ValidationError::EmptyMentionText.into());
        }
        if incoming.mention_count == 0 {
            return Err(ValidationError::MalformedRecord {
                reason: format!("entity '{}' has mention_count 0", incoming.canonical_name),
            }
            .into());
        }
        incoming.id = EntityId::for_normalized_name(&incoming.normalized_name);

        let mut state = self.state.write().map_err(|_| lock_err("index.upsert"))?;

        let owners: BTreeSet<String> = incoming
            .claimed_keys()
            .iter()
            .filter_map(|k| state.claims.get(k).cloned())
            .collect();

        if owners.is_empty() {
            let id = incoming.id;
            state.by_id.insert(id, incoming.normalized_name.clone());
            claim_all(&mut state, &incoming);
            tracing::debug!(%id, name = %incoming.canonical_name, "inserted entity");
            state.by_key.insert(incoming.normalized_name.clone(), incoming);
            return Ok(UpsertOutcome::Inserted { id });
        }

        let primary_key = if owners.contains(&incoming.normalized_name) {
            incoming.normalized_name.clone()
        } else {
            let mut ranked: Vec<&String> = owners.iter().collect();
            ranked.sort_by(|a, b| {
                let ca = state.by_key.get(*a).map_or(0, |e| e.mention_count);
                let cb = state.by_key.get(*b).map_or(0, |e| e.mention_count);
                cb.cmp(&ca).then_with(|| a.cmp(b))
            });
            ranked[0].clone()
        };

        let Some(mut primary) = state.by_key.remove(&primary_key) else {
            return Err(EntigraphError::internal(format!(
                "claim table points at missing entity '{primary_key}'"
            )));
        };

        let mut absorbed = Vec::new();
        for key in owners.iter().filter(|k| **k != primary_key) {
            let Some(other) = state.by_key.remove(key) else {
                continue;
            };
            if other.entity_type != primary.entity_type {
                tracing::warn!(
                    survivor = %primary.canonical_name,
                    absorbed = %other.canonical_name,
                    survivor_type = %primary.entity_type,
                    absorbed_type = %other.entity_type,
                    "alias conflict merges entities of different types"
                );
            }
            state.by_id.remove(&other.id);
            for target in state.merged_into.values_mut() {
                if *target == other.id {
                    *target = primary.id;
                }
            }
            state.merged_into.insert(other.id, primary.id);
            absorbed.push(other.id);
            primary.absorb(other);
        }

        if incoming.entity_type != primary.entity_type {
            tracing::warn!(
                entity = %primary.canonical_name,
                incoming = %incoming.canonical_name,
                "upsert type differs from existing entity; keeping {}",
                primary.entity_type
            );
        }
        if incoming.id != primary.id && !state.by_id.contains_key(&incoming.id) {
            state.merged_into.insert(incoming.id, primary.id);
        }
        primary.absorb(incoming);

        let id = primary.id;
        state.by_id.insert(id, primary_key.clone());
        claim_all(&mut state, &primary);
        state.by_key.insert(primary_key, primary);

        if !absorbed.is_empty() {
            tracing::info!(%id, absorbed = absorbed.len(), "alias conflict merged entities");
        }
        Ok(UpsertOutcome::Merged { id, absorbed })
    }

    /// All live entities ordered by normalized key.
    pub fn entities(&self) -> EntigraphResult<Vec<CanonicalEntity>> {
        let state = self.state.read().map_err(|_| lock_err("index.entities"))?;
        Ok(state.by_key.values().cloned().collect())
    }

    /// Renders the persisted mapping.
    pub fn to_persisted(&self) -> EntigraphResult<PersistedIndex> {
        let state = self.state.read().map_err(|_| lock_err("index.to_persisted"))?;

        let mut merged: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for from in state.merged_into.keys() {
            let to = resolve_canonical_id(&state, *from)?;
            merged.entry(to).or_default().push(*from);
        }

        let entities = state
            .by_key
            .iter()
            .map(|(key, entity)| {
                let mut ids = merged.remove(&entity.id).unwrap_or_default();
                ids.sort_unstable();
                (key.clone(), PersistedEntity::from_entity(entity, ids))
            })
            .collect();
        Ok(PersistedIndex { entities })
    }

    /// Rebuilds an index from its persisted mapping, verifying the invariants.
    ///
    /// # Errors
    ///
    /// Returns [`IndexCorruptionError`] if a key does not match its entity's
    /// normalized name, a mention count is zero, two entities claim the same
    /// surface form, or a merged id is live or recorded twice.
    pub fn from_persisted(persisted: &PersistedIndex) -> EntigraphResult<Self> {
        let mut state = IndexState::default();

        for (key, record) in &persisted.entities {
            let entity = record.to_entity();
            if *key != entity.normalized_name {
                return Err(IndexCorruptionError::KeyMismatch {
                    key: key.clone(),
                    expected: entity.normalized_name,
                }
                .into());
            }
            if entity.mention_count == 0 {
                return Err(IndexCorruptionError::InvalidMentionCount {
                    key: key.clone(),
                    count: 0,
                }
                .into());
            }
            for claimed in entity.claimed_keys() {
                if let Some(first) = state.claims.get(&claimed) {
                    if first != key {
                        return Err(IndexCorruptionError::AliasConflict {
                            alias: claimed,
                            first: first.clone(),
                            second: key.clone(),
                        }
                        .into());
                    }
                }
                state.claims.insert(claimed, key.clone());
            }
            state.by_id.insert(entity.id, key.clone());
            state.by_key.insert(key.clone(), entity);
        }

        // Redirects are checked once every live id is known.
        for (key, record) in &persisted.entities {
            let Some(target) = state.by_key.get(key).map(|e| e.id) else {
                continue;
            };
            for merged_id in &record.merged_ids {
                let reason = if state.by_id.contains_key(merged_id) {
                    Some("is a live entity")
                } else if state.merged_into.contains_key(merged_id) {
                    Some("is already redirected")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(IndexCorruptionError::InvalidRedirect {
                        key: key.clone(),
                        id: merged_id.to_string(),
                        reason: reason.to_string(),
                    }
                    .into());
                }
                state.merged_into.insert(*merged_id, target);
            }
        }

        tracing::debug!(
            entities = state.by_key.len(),
            redirects = state.merged_into.len(),
            "rebuilt entity index"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Re-derives the claim table and checks every structural invariant.
    pub fn check_invariants(&self) -> EntigraphResult<()> {
        let state = self.state.read().map_err(|_| lock_err("index.check_invariants"))?;

        let mut seen_ids: HashMap<EntityId, &str> = HashMap::new();
        let mut claims: HashMap<String, &str> = HashMap::new();
        for (key, entity) in &state.by_key {
            if *key != entity.normalized_name || normalize_name(&entity.canonical_name) != *key {
                return Err(IndexCorruptionError::KeyMismatch {
                    key: key.clone(),
                    expected: normalize_name(&entity.canonical_name),
                }
                .into());
            }
            if entity.mention_count == 0 {
                return Err(IndexCorruptionError::InvalidMentionCount {
                    key: key.clone(),
                    count: 0,
                }
                .into());
            }
            if seen_ids.insert(entity.id, key).is_some() {
                return Err(IndexCorruptionError::DuplicateKey { key: key.clone() }.into());
            }
            for claimed in entity.claimed_keys() {
                if let Some(first) = claims.insert(claimed.clone(), key) {
                    return Err(IndexCorruptionError::AliasConflict {
                        alias: claimed,
                        first: first.to_string(),
                        second: key.clone(),
                    }
                    .into());
                }
            }
        }
        for (from, to) in &state.merged_into {
            let owner = state.by_id.get(to).map_or_else(|| to.to_string(), Clone::clone);
            let reason = if state.by_id.contains_key(from) {
                Some("is a live entity")
            } else {
                match resolve_canonical_id(&state, *from) {
                    Ok(end) if state.by_id.contains_key(&end) => None,
                    _ => Some("does not resolve to a live entity"),
                }
            };
            if let Some(reason) = reason {
                return Err(IndexCorruptionError::InvalidRedirect {
                    key: owner,
                    id: from.to_string(),
                    reason: reason.to_string(),
                }
                .into());
            }
        }
        if state.by_id.len() != state.by_key.len() {
            return Err(EntigraphError::internal(format!(
                "id table holds {} entries for {} entities",
                state.by_id.len(),
                state.by_key.len()
            )));
        }
        Ok(())
    }
}
