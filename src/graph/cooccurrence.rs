//! Co-occurrence input records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, RejectedRecord, MAX_TEXT_LEN};
use crate::error::ValidationError;

/// Where a co-occurrence was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Co-mention within one document
    Document,
    /// Shared flight manifest
    FlightLog,
    /// Same correspondence thread
    Correspondence,
}

impl SourceKind {
    /// Every known kind, in sub-count order.
    pub const ALL: [Self; 3] = [Self::Document, Self::FlightLog, Self::Correspondence];

    /// Tag recorded in an edge's `connection_types`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::FlightLog => "flight_log",
            Self::Correspondence => "correspondence",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| ValidationError::MalformedRecord {
                reason: format!("unknown source kind '{s}'"),
            })
    }
}

/// One observed pairing of two entities.
///
/// `entity_a` and `entity_b` hold either an entity id or a surface name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrence {
    pub entity_a: String,
    pub entity_b: String,
    pub source_kind: SourceKind,
    pub increment: i64,
}

impl CoOccurrence {
    /// Creates and validates a record.
    pub fn new(
        entity_a: impl Into<String>,
        entity_b: impl Into<String>,
        source_kind: SourceKind,
        increment: i64,
    ) -> Result<Self, ValidationError> {
        let record = Self {
            entity_a: entity_a.into(),
            entity_b: entity_b.into(),
            source_kind,
            increment,
        };
        record.validate()?;
        Ok(record)
    }

    /// Pairs two resolved entities by id.
    pub fn between(
        a: EntityId,
        b: EntityId,
        source_kind: SourceKind,
        increment: i64,
    ) -> Result<Self, ValidationError> {
        Self::new(a.to_string(), b.to_string(), source_kind, increment)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [("entity_a", &self.entity_a), ("entity_b", &self.entity_b)] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
            if value.len() > MAX_TEXT_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: field.to_string(),
                    max_length: MAX_TEXT_LEN,
                });
            }
        }
        if self.increment <= 0 {
            return Err(ValidationError::NonPositiveIncrement {
                value: self.increment,
            });
        }
        Ok(())
    }

    /// Parses and validates one loosely-typed record.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let record: Self = serde_json::from_value(value).map_err(|e| ValidationError::MalformedRecord {
            reason: e.to_string(),
        })?;
        record.validate()?;
        Ok(record)
    }
}

/// Splits raw records into valid co-occurrences and rejections.
pub fn parse_cooccurrences(
    records: impl IntoIterator<Item = serde_json::Value>,
) -> (Vec<CoOccurrence>, Vec<RejectedRecord>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for (position, record) in records.into_iter().enumerate() {
        match CoOccurrence::from_value(record) {
            Ok(r) => accepted.push(r),
            Err(e) => {
                tracing::debug!(position, error = %e, "rejected co-occurrence record");
                rejected.push(RejectedRecord::new(position, &e));
            }
        }
    }
    (accepted, rejected)
}
