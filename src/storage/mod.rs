//! Persistence backends for the entity index.
//!
//! The [`IndexPersistence`] trait is the contract; [`InMemoryPersistence`] is
//! the reference backend and the `persistent` feature adds a crash-safe,
//! file-locked directory store.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryPersistence;
pub use traits::{CommitReceipt, IndexPersistence, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{FileLock, IndexManifest, IndexStore};
