//! Error types for entigraph.
//!
//! Errors are strongly typed using thiserror and follow the taxonomy the
//! pipeline relies on:
//!
//! - [`ValidationError`]: a single malformed record. Recoverable; the record
//!   is skipped and counted.
//! - [`UnresolvableReferenceError`]: a co-occurrence names an entity the index
//!   does not hold. Fatal for the current batch's graph mutation only.
//! - [`IndexCorruptionError`]: structural damage in the index or graph. Always
//!   surfaced, never downgraded.
//!
//! Non-fatal consistency findings are not errors; they are reported as
//! [`crate::verifier::ConsistencyWarning`]s.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::EntityId;
use crate::storage::StorageError;

/// Validation errors raised at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Mention text cannot be empty")]
    EmptyMentionText,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Confidence value {value} is below the configured floor {floor}")]
    BelowConfidenceFloor {
        value: f64,
        floor: f64,
    },

    #[error("Co-occurrence increment must be positive, got {value}")]
    NonPositiveIncrement {
        value: i64,
    },

    #[error("Co-occurrence pairs entity {entity} with itself")]
    SelfLoop {
        entity: EntityId,
    },

    #[error("Threshold '{name}' must be within [0.0, 1.0], got {value}")]
    InvalidThreshold {
        name: String,
        value: f64,
    },

    #[error("Malformed record: {reason}")]
    MalformedRecord {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Which side of a co-occurrence failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSide {
    /// The `entity_a` field.
    EntityA,
    /// The `entity_b` field.
    EntityB,
}

impl fmt::Display for ReferenceSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityA => write!(f, "entity_a"),
            Self::EntityB => write!(f, "entity_b"),
        }
    }
}

/// One reference the index could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    /// Position of the record within its batch.
    pub position: usize,
    /// Which field held the reference.
    pub side: ReferenceSide,
    /// The reference text as submitted.
    pub reference: String,
}

/// A batch referenced entities absent from the index.
///
/// Every unresolved reference in the batch is listed so the producer can fix
/// them in one pass. No graph mutation from the batch was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvableReferenceError {
    /// All unresolved references, in record order.
    pub unresolved: Vec<UnresolvedReference>,
}

impl fmt::Display for UnresolvableReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unresolvable entity reference(s) in batch", self.unresolved.len())?;
        if let Some(first) = self.unresolved.first() {
            write!(
                f,
                "; first: {} '{}' at record {}",
                first.side, first.reference, first.position
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for UnresolvableReferenceError {}

/// Structural damage in the index or graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexCorruptionError {
    #[error("Normalized name '{key}' is claimed by more than one entity")]
    DuplicateKey {
        key: String,
    },

    #[error("Alias '{alias}' is claimed by both '{first}' and '{second}'")]
    AliasConflict {
        alias: String,
        first: String,
        second: String,
    },

    #[error("Persisted key '{key}' does not match the normalized canonical name '{expected}'")]
    KeyMismatch {
        key: String,
        expected: String,
    },

    #[error("Entity '{key}' has invalid mention count {count}")]
    InvalidMentionCount {
        key: String,
        count: u64,
    },

    #[error("Merged id {id} recorded on '{key}' {reason}")]
    InvalidRedirect {
        key: String,
        id: String,
        reason: String,
    },

    #[error("Manifest generation {generation} names missing file {file}")]
    MissingIndexFile {
        file: String,
        generation: u64,
    },

    #[error("Checksum mismatch for {file}: stored={stored:08x}, computed={computed:08x}")]
    ChecksumMismatch {
        file: String,
        stored: u32,
        computed: u32,
    },

    #[error("Graph integrity checks failed: {}", .checks.join(", "))]
    IntegrityCheckFailed {
        checks: Vec<String>,
    },
}

/// Errors from the batch runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Queue full for {pool} pool (capacity: {capacity})")]
    QueueFull {
        pool: String,
        capacity: usize,
    },

    #[error("Worker pool disconnected: {pool}")]
    Disconnected {
        pool: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for entigraph.
#[derive(Debug, Error)]
pub enum EntigraphError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unresolvable reference: {0}")]
    Unresolvable(#[from] UnresolvableReferenceError),

    #[error("Index corruption: {0}")]
    Corruption(#[from] IndexCorruptionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EntigraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a record-level validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error aborts the current batch but leaves
    /// committed index state intact.
    #[must_use]
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::Unresolvable(_) | Self::Runtime(_))
    }

    /// Returns true if this error signals a defect in prior writes and must
    /// stop the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Corruption(_) | Self::Internal { .. } => true,
            Self::Storage(e) => e.is_corruption(),
            _ => false,
        }
    }
}

/// Result type alias for entigraph operations.
pub type EntigraphResult<T> = Result<T, EntigraphError>;
