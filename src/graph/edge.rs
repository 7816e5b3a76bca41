//! Weighted relationship edges.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::graph::SourceKind;

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Relationship between two entities, stored once per unordered pair with
/// `source_id < target_id`.
///
/// `weight` is derived: every call to [`Edge::record`] recomputes it as the
/// sum of the typed sub-counts.
///
/// # Examples
///
/// ```
/// use entigraph::graph::{Edge, SourceKind};
/// use entigraph::EntityId;
///
/// let a = EntityId::for_normalized_name("jeffrey epstein");
/// let b = EntityId::for_normalized_name("ghislaine maxwell");
/// let mut edge = Edge::new(a, b);
/// edge.record(SourceKind::Document, 205);
/// edge.record(SourceKind::FlightLog, 291);
/// assert_eq!(edge.weight, 496);
/// assert!(edge.source_id < edge.target_id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub weight: u64,
    pub document_count: u64,
    pub flight_log_count: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub correspondence_count: u64,
    pub connection_types: BTreeSet<String>,
}

impl Edge {
    /// Creates an empty edge between two entities, ordering the endpoints.
    #[must_use]
    pub fn new(a: EntityId, b: EntityId) -> Self {
        let (source_id, target_id) = if a <= b { (a, b) } else { (b, a) };
        Self {
            source_id,
            target_id,
            weight: 0,
            document_count: 0,
            flight_log_count: 0,
            correspondence_count: 0,
            connection_types: BTreeSet::new(),
        }
    }

    /// Ordered key for an unordered pair.
    #[must_use]
    pub fn key(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }

    /// Sub-count for one source kind.
    #[must_use]
    pub const fn count_for(&self, kind: SourceKind) -> u64 {
        match kind {
            SourceKind::Document => self.document_count,
            SourceKind::FlightLog => self.flight_log_count,
            SourceKind::Correspondence => self.correspondence_count,
        }
    }

    fn count_for_mut(&mut self, kind: SourceKind) -> &mut u64 {
        match kind {
            SourceKind::Document => &mut self.document_count,
            SourceKind::FlightLog => &mut self.flight_log_count,
            SourceKind::Correspondence => &mut self.correspondence_count,
        }
    }

    /// Sum of all recorded sub-counts.
    #[must_use]
    pub const fn documented_weight(&self) -> u64 {
        self.document_count
            .saturating_add(self.flight_log_count)
            .saturating_add(self.correspondence_count)
    }

    /// Accumulates an increment and recomputes `weight`.
    pub fn record(&mut self, kind: SourceKind, increment: u64) {
        let count = self.count_for_mut(kind);
        *count = count.saturating_add(increment);
        self.connection_types.insert(kind.as_str().to_string());
        self.weight = self.documented_weight();
    }

    /// Folds another edge's sub-counts into this one.
    pub fn absorb(&mut self, other: &Self) {
        for kind in SourceKind::ALL {
            let count = self.count_for_mut(kind);
            *count = count.saturating_add(other.count_for(kind));
        }
        self.connection_types
            .extend(other.connection_types.iter().cloned());
        self.weight = self.documented_weight();
    }

    /// Connection tags with no recorded sub-count behind them.
    pub fn undocumented_types(&self) -> impl Iterator<Item = &str> {
        self.connection_types.iter().map(String::as_str).filter(|tag| {
            match tag.parse::<SourceKind>() {
                Ok(kind) => self.count_for(kind) == 0,
                Err(_) => true,
            }
        })
    }
}
