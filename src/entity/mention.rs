//! Raw mention records and ingestion-boundary validation.
//!
//! Mentions arrive from external extractors as loosely-typed JSON. Each record
//! is parsed on its own so one malformed record becomes a counted
//! [`ValidationError`] instead of failing the whole batch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::error::ValidationError;

/// Upper bound for mention text and document identifiers.
pub const MAX_TEXT_LEN: usize = 1024;

/// Role of a mention inside a correspondence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrespondenceRole {
    Sender,
    Recipient,
    Cc,
}

impl fmt::Display for CorrespondenceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Recipient => write!(f, "recipient"),
            Self::Cc => write!(f, "cc"),
        }
    }
}

/// One raw, unresolved occurrence of an entity name in a source document.
///
/// # Examples
///
/// ```
/// use entigraph::{EntityType, Mention};
///
/// let mention = Mention::new("Jeffrey Epstein", EntityType::Person, "flight-log-1997", 0.93).unwrap();
/// assert_eq!(mention.text, "Jeffrey Epstein");
///
/// assert!(Mention::new("   ", EntityType::Person, "doc", 0.5).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,

    #[serde(alias = "type")]
    pub entity_type: EntityType,

    pub source_document: String,

    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CorrespondenceRole>,
}

impl Mention {
    /// Creates and validates a mention.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the text or document is empty or too
    /// long, or the confidence lies outside `[0.0, 1.0]`.
    pub fn new(
        text: impl Into<String>,
        entity_type: EntityType,
        source_document: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        let mention = Self {
            text: text.into(),
            entity_type,
            source_document: source_document.into(),
            confidence,
            role: None,
        };
        mention.validate()?;
        Ok(mention)
    }

    /// Sets the correspondence role.
    #[must_use]
    pub fn with_role(mut self, role: CorrespondenceRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Validates this mention.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMentionText);
        }
        if text.len() > MAX_TEXT_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "text".to_string(),
                max_length: MAX_TEXT_LEN,
            });
        }
        let document = self.source_document.trim();
        if document.is_empty() {
            return Err(ValidationError::MissingField {
                field: "source_document".to_string(),
            });
        }
        if document.len() > MAX_TEXT_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "source_document".to_string(),
                max_length: MAX_TEXT_LEN,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                value: self.confidence,
            });
        }
        Ok(())
    }

    /// Parses and validates one loosely-typed record.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let mention: Self = serde_json::from_value(value).map_err(|e| ValidationError::MalformedRecord {
            reason: e.to_string(),
        })?;
        mention.validate()?;
        Ok(mention)
    }
}

/// A record rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Position of the record in its batch.
    pub position: usize,
    /// Human-readable rejection reason.
    pub reason: String,
}

impl RejectedRecord {
    pub(crate) fn new(position: usize, error: &ValidationError) -> Self {
        Self {
            position,
            reason: error.to_string(),
        }
    }
}

/// Splits raw records into valid mentions and rejections.
pub fn parse_mentions(
    records: impl IntoIterator<Item = serde_json::Value>,
) -> (Vec<Mention>, Vec<RejectedRecord>) {
    let mut mentions = Vec::new();
    let mut rejected = Vec::new();
    for (position, record) in records.into_iter().enumerate() {
        match Mention::from_value(record) {
            Ok(m) => mentions.push(m),
            Err(e) => {
                tracing::debug!(position, error = %e, "rejected mention record");
                rejected.push(RejectedRecord::new(position, &e));
            }
        }
    }
    (mentions, rejected)
}
