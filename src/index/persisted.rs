//! Persisted form of the entity index.
//!
//! ```json
//! {
//!   "jeffrey epstein": {
//!     "canonical_name": "Jeffrey Epstein",
//!     "entity_type": "person",
//!     "aliases": ["Epstein, Jeffrey", "J. Epstein"],
//!     "mention_count": 3,
//!     "source_documents": ["flight-1997-03"]
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::similarity::normalize_name;

/// One entity as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntity {
    pub canonical_name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub mention_count: u64,
    #[serde(default)]
    pub source_documents: Vec<String>,
    /// Identifiers of entities absorbed into this one by alias-conflict merges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_ids: Vec<EntityId>,
}

impl PersistedEntity {
    pub(crate) fn from_entity(entity: &CanonicalEntity, merged_ids: Vec<EntityId>) -> Self {
        Self {
            canonical_name: entity.canonical_name.clone(),
            entity_type: entity.entity_type,
            aliases: entity.aliases.iter().cloned().collect(),
            mention_count: entity.mention_count,
            source_documents: entity.source_documents.iter().cloned().collect(),
            merged_ids,
        }
    }

    /// Rebuilds the in-memory entity. The id is re-derived from the name.
    #[must_use]
    pub fn to_entity(&self) -> CanonicalEntity {
        let normalized_name = normalize_name(&self.canonical_name);
        CanonicalEntity {
            id: EntityId::for_normalized_name(&normalized_name),
            canonical_name: self.canonical_name.trim().to_string(),
            normalized_name,
            entity_type: self.entity_type,
            aliases: self.aliases.iter().cloned().collect(),
            mention_count: self.mention_count,
            source_documents: self.source_documents.iter().cloned().collect(),
        }
    }
}

/// The whole index keyed by `normalized_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedIndex {
    pub entities: BTreeMap<String, PersistedEntity>,
}

impl PersistedIndex {
    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entities are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = r#"{
            "ghislaine maxwell": {
                "canonical_name": "Ghislaine Maxwell",
                "entity_type": "person",
                "aliases": ["G. Maxwell"],
                "mention_count": 2,
                "source_documents": ["email-0042"]
            }
        }"#;
        let index: PersistedIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.len(), 1);
        let entity = index.entities["ghislaine maxwell"].to_entity();
        assert_eq!(entity.id, EntityId::for_normalized_name("ghislaine maxwell"));
        assert!(entity.aliases.contains("G. Maxwell"));

        let rendered = serde_json::to_value(&index).unwrap();
        assert!(rendered["ghislaine maxwell"].get("merged_ids").is_none());
    }
}
