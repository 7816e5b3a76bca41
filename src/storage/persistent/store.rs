//! Directory-backed index store.
//!
//! Layout:
//!
//! ```text
//! <dir>/
//!   .lock                 exclusive flock while the store is open
//!   index.00000007.json   persisted mapping of generation 7
//!   index.00000006.json   previous generation, kept until the next commit
//!   index.manifest.json   format version, generation, file name, CRC32
//! ```
//!
//! Each generation's mapping goes to its own file, then the manifest naming it
//! is swapped in. The manifest rename is the commit point: a crash before it
//! leaves the previous manifest pointing at the previous, intact generation.
//! Every file is written to a temporary sibling, fsynced, then renamed.
//!
//! A bare `index.json` without a manifest is imported unverified.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexCorruptionError;
use crate::index::PersistedIndex;
use crate::storage::persistent::FileLock;
use crate::storage::traits::{CommitReceipt, IndexPersistence, StorageError};

/// Mapping file read when no manifest exists.
pub const INDEX_FILE: &str = "index.json";

/// Manifest file name.
pub const MANIFEST_FILE: &str = "index.manifest.json";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// File name holding the mapping of `generation`.
#[must_use]
pub fn index_file_name(generation: u64) -> String {
    format!("index.{generation:08}.json")
}

fn parse_generation(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("index.")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn default_index_file() -> String {
    INDEX_FILE.to_string()
}

/// Integrity metadata for the committed mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub generation: u64,
    /// Mapping file this manifest vouches for, relative to the store directory.
    #[serde(default = "default_index_file")]
    pub index_file: String,
    pub entity_count: usize,
    pub crc32: u32,
    pub written_at: DateTime<Utc>,
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Write `bytes` to `path` via temp file, fsync, and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("index");
    let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4()));

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::io(format!("writing {}", path.display()), e));
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(format!("reading {}", path.display()), e)),
    }
}

/// File-backed [`IndexPersistence`] holding an exclusive directory lock.
#[derive(Debug)]
pub struct IndexStore {
    dir: PathBuf,
    generation: Mutex<u64>,
    _lock: FileLock,
}

impl IndexStore {
    /// Open (creating if needed) an index directory and take its lock.
    ///
    /// # Errors
    /// - `StorageError::Locked` if another process holds the directory
    /// - `StorageError::Corrupted` if an existing manifest cannot be parsed
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)
            .map_err(|e| StorageError::io(format!("creating {}", dir.display()), e))?;

        let lock = FileLock::acquire(dir).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                StorageError::Locked {
                    path: dir.display().to_string(),
                }
            } else {
                StorageError::io("acquiring index lock", e)
            }
        })?;

        let store = Self {
            dir: dir.to_path_buf(),
            generation: Mutex::new(0),
            _lock: lock,
        };
        let generation = store.manifest()?.map_or(0, |m| m.generation);
        *store.generation.lock().map_err(|_| poisoned("store.open"))? = generation;
        tracing::debug!(dir = %dir.display(), generation, "opened index store");
        Ok(store)
    }

    /// Directory this store owns.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Read the current manifest, if any.
    pub fn manifest(&self) -> Result<Option<IndexManifest>, StorageError> {
        let Some(bytes) = read_optional(&self.manifest_path())? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("manifest: {e}")))
    }

    /// Removes mapping files older than the previous generation, and the
    /// manifest-less import file once a manifest exists.
    fn prune(&self, generation: u64) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "skipping index prune");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let stale = match parse_generation(name) {
                Some(g) => g + 1 < generation,
                None => name == INDEX_FILE,
            };
            if stale {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!(file = name, error = %e, "failed to remove stale index file");
                }
            }
        }
    }
}

fn poisoned(context: &str) -> StorageError {
    StorageError::Poisoned {
        context: context.to_string(),
    }
}

impl IndexPersistence for IndexStore {
    fn load(&self) -> Result<Option<PersistedIndex>, StorageError> {
        let (file_name, bytes) = match self.manifest()? {
            Some(manifest) => {
                if manifest.format_version != FORMAT_VERSION {
                    return Err(StorageError::Serialization(format!(
                        "unsupported index format version: {} (expected {FORMAT_VERSION})",
                        manifest.format_version
                    )));
                }
                let Some(bytes) = read_optional(&self.index_path(&manifest.index_file))? else {
                    return Err(IndexCorruptionError::MissingIndexFile {
                        file: manifest.index_file,
                        generation: manifest.generation,
                    }
                    .into());
                };
                let computed = checksum(&bytes);
                if computed != manifest.crc32 {
                    return Err(IndexCorruptionError::ChecksumMismatch {
                        file: manifest.index_file,
                        stored: manifest.crc32,
                        computed,
                    }
                    .into());
                }
                (manifest.index_file, bytes)
            }
            None => {
                let Some(bytes) = read_optional(&self.index_path(INDEX_FILE))? else {
                    return Ok(None);
                };
                tracing::warn!(
                    dir = %self.dir.display(),
                    "index.json has no manifest; loading without checksum verification"
                );
                (INDEX_FILE.to_string(), bytes)
            }
        };

        let index: PersistedIndex = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Serialization(format!("{file_name}: {e}")))?;
        Ok(Some(index))
    }

    fn commit(&self, index: &PersistedIndex) -> Result<CommitReceipt, StorageError> {
        let mut generation = self.generation.lock().map_err(|_| poisoned("store.commit"))?;

        let bytes = serde_json::to_vec_pretty(index)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let next = *generation + 1;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            generation: next,
            index_file: index_file_name(next),
            entity_count: index.len(),
            crc32: checksum(&bytes),
            written_at: Utc::now(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        write_atomic(&self.index_path(&manifest.index_file), &bytes)?;
        write_atomic(&self.manifest_path(), &manifest_bytes)?;
        *generation = manifest.generation;
        self.prune(manifest.generation);

        tracing::info!(
            generation = manifest.generation,
            entities = manifest.entity_count,
            "committed entity index"
        );
        Ok(CommitReceipt {
            generation: manifest.generation,
            entity_count: manifest.entity_count,
            written_at: manifest.written_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CanonicalEntity, EntityType};
    use crate::index::EntityIndex;
    use tempfile::tempdir;

    fn sample_index() -> PersistedIndex {
        let index = EntityIndex::new();
        index
            .upsert(
                CanonicalEntity::new("Jeffrey Epstein", EntityType::Person)
                    .with_alias("J. Epstein")
                    .with_source_document("flight-1997-03"),
            )
            .unwrap();
        index
            .upsert(CanonicalEntity::new("Acme Holdings", EntityType::Organization))
            .unwrap();
        index.to_persisted().unwrap()
    }

    #[test]
    fn test_empty_directory_loads_none() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.manifest().unwrap().is_none());
    }

    #[test]
    fn test_commit_and_reload() {
        let dir = tempdir().unwrap();
        let persisted = sample_index();
        {
            let store = IndexStore::open(dir.path()).unwrap();
            let receipt = store.commit(&persisted).unwrap();
            assert_eq!(receipt.generation, 1);
            assert_eq!(receipt.entity_count, 2);
            store.commit(&persisted).unwrap();
        }

        let store = IndexStore::open(dir.path()).unwrap();
        assert_eq!(store.manifest().unwrap().unwrap().generation, 2);
        assert_eq!(store.load().unwrap().unwrap(), persisted);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = IndexStore::open(dir.path()).unwrap();
        let err = IndexStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::Locked { .. }));
    }

    #[test]
    fn test_tampered_index_detected() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store.commit(&sample_index()).unwrap();

        let path = dir.path().join(index_file_name(1));
        let mut contents = fs::read_to_string(&path).unwrap();
        contents = contents.replace("Acme Holdings", "Acme Holdinks");
        fs::write(&path, contents).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn test_crash_before_manifest_swap_keeps_previous_generation() {
        let dir = tempdir().unwrap();
        let first = sample_index();
        let second = {
            let index = EntityIndex::from_persisted(&first).unwrap();
            index
                .upsert(CanonicalEntity::new("Ghislaine Maxwell", EntityType::Person))
                .unwrap();
            index.to_persisted().unwrap()
        };

        let manifest_path = dir.path().join(MANIFEST_FILE);
        let old_manifest = {
            let store = IndexStore::open(dir.path()).unwrap();
            store.commit(&first).unwrap();
            let saved = fs::read(&manifest_path).unwrap();
            store.commit(&second).unwrap();
            saved
        };
        // The new mapping landed but the manifest swap did not.
        fs::write(&manifest_path, old_manifest).unwrap();

        let store = IndexStore::open(dir.path()).unwrap();
        assert_eq!(store.manifest().unwrap().unwrap().generation, 1);
        assert_eq!(store.load().unwrap().unwrap(), first);

        let receipt = store.commit(&second).unwrap();
        assert_eq!(receipt.generation, 2);
        assert_eq!(store.load().unwrap().unwrap(), second);
    }

    #[test]
    fn test_commit_prunes_older_generations() {
        let dir = tempdir().unwrap();
        let bytes = serde_json::to_vec(&sample_index()).unwrap();
        fs::write(dir.path().join(INDEX_FILE), bytes).unwrap();

        let store = IndexStore::open(dir.path()).unwrap();
        for _ in 0..3 {
            store.commit(&sample_index()).unwrap();
        }
        assert!(!dir.path().join(INDEX_FILE).exists());
        assert!(!dir.path().join(index_file_name(1)).exists());
        assert!(dir.path().join(index_file_name(2)).exists());
        assert!(dir.path().join(index_file_name(3)).exists());
        assert_eq!(parse_generation(&index_file_name(3)), Some(3));
        assert_eq!(parse_generation(MANIFEST_FILE), None);
    }

    #[test]
    fn test_missing_generation_file_is_corruption() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store.commit(&sample_index()).unwrap();
        fs::remove_file(dir.path().join(index_file_name(1))).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Corrupted(IndexCorruptionError::MissingIndexFile { generation: 1, .. })
        ));
    }

    #[test]
    fn test_manifestless_index_is_accepted() {
        let dir = tempdir().unwrap();
        let bytes = serde_json::to_vec(&sample_index()).unwrap();
        fs::write(dir.path().join(INDEX_FILE), bytes).unwrap();

        let store = IndexStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
