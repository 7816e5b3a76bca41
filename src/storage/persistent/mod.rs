//! Durable index storage.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               IndexStore                  │
//! ├──────────────────────────────────────────┤
//! │  index.<gen>.json ◄── temp+fsync+rename   │
//! │  index.manifest.json  ◄── commit point    │
//! │              │                            │
//! │              ↓                            │
//! │     FileLock (flock on .lock)             │
//! └──────────────────────────────────────────┘
//! ```

mod file_lock;
mod store;

pub use file_lock::FileLock;
pub use store::{
    index_file_name, IndexManifest, IndexStore, FORMAT_VERSION, INDEX_FILE, MANIFEST_FILE,
};
