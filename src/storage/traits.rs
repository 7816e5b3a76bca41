//! Abstract persistence contract for the entity index.
//!
//! The index itself lives in memory; a persistence backend only has to load
//! the persisted mapping wholesale at start-up and write it back after each
//! committed batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::IndexCorruptionError;
use crate::index::PersistedIndex;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A lock guarding shared state was poisoned by a panicking writer.
    #[error("poisoned lock: {context}")]
    Poisoned {
        context: String,
    },

    /// Filesystem failure.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process holds the index directory.
    #[error("Index directory {path} is locked by another process")]
    Locked {
        path: String,
    },

    /// Persisted data failed an integrity check.
    #[error("Persisted index is corrupted: {0}")]
    Corrupted(#[from] IndexCorruptionError),
}

impl StorageError {
    /// Returns true if persisted data failed an integrity check.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted(_))
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Acknowledgement of a committed index write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Monotonic commit counter for this backend.
    pub generation: u64,
    /// Entities written.
    pub entity_count: usize,
    pub written_at: DateTime<Utc>,
}

/// Storage contract for the persisted index form.
///
/// # Safety Considerations
/// - `commit` must be atomic: readers observe either the previous or the new
///   mapping, never a mix.
/// - Implementations should handle concurrent access safely.
pub trait IndexPersistence: Send + Sync {
    /// Load the persisted mapping. Returns `Ok(None)` if nothing was written yet.
    fn load(&self) -> Result<Option<PersistedIndex>, StorageError>;

    /// Replace the persisted mapping.
    fn commit(&self, index: &PersistedIndex) -> Result<CommitReceipt, StorageError>;
}
