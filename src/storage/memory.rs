//! In-memory persistence backend.
//!
//! Keeps the last committed mapping in memory. Intended for embedded usage,
//! tests, and as a reference implementation.

use std::sync::RwLock;

use chrono::Utc;

use crate::index::PersistedIndex;
use crate::storage::traits::{CommitReceipt, IndexPersistence, StorageError};

#[derive(Debug, Default)]
struct MemoryState {
    committed: Option<PersistedIndex>,
    generation: u64,
}

/// Thread-safe in-memory persistence.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: RwLock<MemoryState>,
}

impl InMemoryPersistence {
    /// Create a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with a mapping.
    #[must_use]
    pub fn with_index(index: PersistedIndex) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                committed: Some(index),
                generation: 0,
            }),
        }
    }

    /// Number of commits accepted so far.
    pub fn generation(&self) -> Result<u64, StorageError> {
        let state = self.state.read().map_err(|_| poisoned("memory.generation"))?;
        Ok(state.generation)
    }
}

fn poisoned(context: &str) -> StorageError {
    StorageError::Poisoned {
        context: context.to_string(),
    }
}

impl IndexPersistence for InMemoryPersistence {
    fn load(&self) -> Result<Option<PersistedIndex>, StorageError> {
        let state = self.state.read().map_err(|_| poisoned("memory.load"))?;
        Ok(state.committed.clone())
    }

    fn commit(&self, index: &PersistedIndex) -> Result<CommitReceipt, StorageError> {
        let mut state = self.state.write().map_err(|_| poisoned("memory.commit"))?;
        state.committed = Some(index.clone());
        state.generation += 1;
        Ok(CommitReceipt {
            generation: state.generation,
            entity_count: index.len(),
            written_at: Utc::now(),
        })
    }
}
