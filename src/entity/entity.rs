//! Canonical entity types and identity management.
//!
//! A [`CanonicalEntity`] is the single resolved identity behind one or more raw
//! name mentions. Its [`EntityId`] is derived from the normalized name, so the
//! same cluster receives the same identifier on every run.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::similarity::normalize_name;

/// Namespace for name-derived entity identifiers.
const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x5c3e_91a4_2d7b_4f08_9e61_b0c4_d2a7_e813);

/// Stable entity identifier.
///
/// Identifiers are UUIDv5 values over the entity's normalized name. The
/// derived `Ord` is the total order used to orient relationship edges.
///
/// # Examples
///
/// ```
/// use entigraph::EntityId;
///
/// let a = EntityId::for_normalized_name("jeffrey epstein");
/// let b = EntityId::for_normalized_name("jeffrey epstein");
/// assert_eq!(a, b);
/// assert!(!a.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Derives the identifier for a normalized name.
    #[must_use]
    pub fn for_normalized_name(normalized_name: &str) -> Self {
        Self(Uuid::new_v5(&ENTITY_NAMESPACE, normalized_name.as_bytes()))
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Creates a nil entity ID (for testing or sentinel values).
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Classification of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A human person
    Person,
    /// A company, institution, or group
    Organization,
}

impl EntityType {
    /// Wire name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" => Ok(Self::Person),
            "organization" | "organisation" => Ok(Self::Organization),
            other => Err(ValidationError::MalformedRecord {
                reason: format!("unknown entity type '{other}'"),
            }),
        }
    }
}

/// The resolved identity for a cluster of mentions.
///
/// `canonical_name` is the first-seen surface form and never changes once
/// minted; later variants only grow `aliases`.
///
/// # Examples
///
/// ```
/// use entigraph::{CanonicalEntity, EntityType};
///
/// let mut entity = CanonicalEntity::new("Jeffrey Epstein", EntityType::Person);
/// assert_eq!(entity.normalized_name, "jeffrey epstein");
///
/// entity.absorb_mention("J. Epstein", "doc-7");
/// assert_eq!(entity.mention_count, 2);
/// assert!(entity.aliases.contains("J. Epstein"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Stable identifier derived from `normalized_name`
    pub id: EntityId,

    pub canonical_name: String,

    /// Lowercased, whitespace-collapsed index key
    pub normalized_name: String,

    pub entity_type: EntityType,

    #[serde(default)]
    pub aliases: BTreeSet<String>,

    pub mention_count: u64,

    #[serde(default)]
    pub source_documents: BTreeSet<String>,
}

impl CanonicalEntity {
    /// Creates an entity for a freshly minted cluster with one mention.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let canonical_name = name.into().trim().to_string();
        let normalized_name = normalize_name(&canonical_name);
        Self {
            id: EntityId::for_normalized_name(&normalized_name),
            canonical_name,
            normalized_name,
            entity_type,
            aliases: BTreeSet::new(),
            mention_count: 1,
            source_documents: BTreeSet::new(),
        }
    }

    /// Adds an alias (builder style).
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias.into());
        self
    }

    /// Adds a provenance document (builder style).
    #[must_use]
    pub fn with_source_document(mut self, document: impl Into<String>) -> Self {
        self.source_documents.insert(document.into());
        self
    }

    /// Sets the mention count (builder style).
    #[must_use]
    pub fn with_mention_count(mut self, count: u64) -> Self {
        self.mention_count = count;
        self
    }

    /// Records an alias if it differs from the canonical name.
    ///
    /// Returns true if the alias set grew.
    pub fn add_alias(&mut self, alias: String) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || alias == self.canonical_name {
            return false;
        }
        self.aliases.insert(alias.to_string())
    }

    /// Folds one more mention into this entity.
    ///
    /// Returns true if the mention text was new and became an alias.
    pub fn absorb_mention(&mut self, text: &str, source_document: &str) -> bool {
        self.mention_count = self.mention_count.saturating_add(1);
        if !source_document.is_empty() {
            self.source_documents.insert(source_document.to_string());
        }
        self.add_alias(text.to_string())
    }

    /// Merges another entity into this one.
    ///
    /// The other entity's canonical name and aliases become aliases here,
    /// mention counts are summed and provenance is unioned.
    pub fn absorb(&mut self, other: Self) {
        self.add_alias(other.canonical_name);
        for alias in other.aliases {
            self.add_alias(alias);
        }
        self.mention_count = self.mention_count.saturating_add(other.mention_count);
        self.source_documents.extend(other.source_documents);
    }

    /// Canonical name followed by every alias.
    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Normalized keys this entity claims in the alias index.
    #[must_use]
    pub fn claimed_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.aliases.iter().map(|a| normalize_name(a)).collect();
        keys.insert(self.normalized_name.clone());
        keys.retain(|k| !k.is_empty());
        keys
    }
}
