//! Persisted change index.
//!
//! Maps relative file keys to the content digest observed at their last
//! successful upload. The whole index is loaded once, mutated in memory and
//! written back in one atomic replace at the end of a run.

use super::fingerprint::HashAlgorithm;
use crate::utils::IndexError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current on-disk format version.
pub const INDEX_VERSION: u32 = 1;

/// Index document, serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    algorithm: HashAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
    files: BTreeMap<String, String>,
}

/// Accepted on-disk shapes. A bare `{key: digest}` object is what the older
/// tool wrote; those digests are SHA-1.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredIndex {
    Document(IndexDocument),
    Legacy(BTreeMap<String, String>),
}

/// In-memory change index for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeIndex {
    algorithm: HashAlgorithm,
    files: BTreeMap<String, String>,
}

impl ChangeIndex {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            files: BTreeMap::new(),
        }
    }

    /// Algorithm the stored digests were computed with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(String::as_str)
    }

    /// Record the digest of an uploaded file. Repeating the same put is a no-op.
    pub fn put(&mut self, key: impl Into<String>, digest: impl Into<String>) {
        self.files.insert(key.into(), digest.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Location of the persisted index.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted index.
    ///
    /// An absent file is not an error: it yields an empty index for
    /// `algorithm`. A present but malformed file is `IndexError::Parse`, and a
    /// document in another format version is `IndexError::UnsupportedVersion`.
    pub fn load(&self, algorithm: HashAlgorithm) -> Result<ChangeIndex, IndexError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChangeIndex::new(algorithm));
            }
            Err(source) => {
                return Err(IndexError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stored: StoredIndex =
            serde_json::from_str(&content).map_err(|source| IndexError::Parse {
                path: self.path.clone(),
                source,
            })?;

        Ok(match stored {
            StoredIndex::Document(doc) if doc.version != INDEX_VERSION => {
                return Err(IndexError::UnsupportedVersion {
                    path: self.path.clone(),
                    found: doc.version,
                    expected: INDEX_VERSION,
                })
            }
            StoredIndex::Document(doc) => ChangeIndex {
                algorithm: doc.algorithm,
                files: doc.files,
            },
            StoredIndex::Legacy(files) => ChangeIndex {
                algorithm: HashAlgorithm::Sha1,
                files,
            },
        })
    }

    /// Load the index for a run, falling back to an empty index when the
    /// persisted state is unusable.
    ///
    /// A missing file is routine; a corrupt file, one from another format
    /// version or one hashed with another algorithm is reported as a warning
    /// and discarded.
    pub fn load_or_empty(&self, algorithm: HashAlgorithm) -> ChangeIndex {
        if !self.path.exists() {
            debug!("No change index at {} yet, starting empty", self.path.display());
            return ChangeIndex::new(algorithm);
        }

        match self.load(algorithm) {
            Ok(index) if index.algorithm() == algorithm => {
                info!(
                    "Loaded change index: {} entries from {}",
                    index.len(),
                    self.path.display()
                );
                index
            }
            Ok(index) => {
                warn!(
                    "Change index {} uses {} digests but this run uses {}, starting empty",
                    self.path.display(),
                    index.algorithm(),
                    algorithm
                );
                ChangeIndex::new(algorithm)
            }
            Err(e) => {
                warn!("{}; starting with an empty change index", e);
                ChangeIndex::new(algorithm)
            }
        }
    }

    /// Replace the persisted index with `index`.
    ///
    /// The document is written to a sibling temporary file, synced and renamed
    /// over the destination, so readers only ever see a complete index.
    pub fn save(&self, index: &ChangeIndex) -> Result<(), IndexError> {
        let io_err = |source: std::io::Error| IndexError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let doc = IndexDocument {
            version: INDEX_VERSION,
            algorithm: index.algorithm,
            saved_at: Some(Utc::now()),
            files: index.files.clone(),
        };

        let tmp_path = self.temp_path();
        let result = write_document(&tmp_path, &doc)
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(source) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(source));
        }

        info!(
            "Saved change index: {} entries to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "index.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_document(path: &Path, doc: &IndexDocument) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, doc)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_absent_is_empty() -> Result<(), IndexError> {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::new(temp_dir.path().join("index.json"));

        let index = store.load(HashAlgorithm::Sha256)?;
        assert!(index.is_empty());
        assert_eq!(index.algorithm(), HashAlgorithm::Sha256);
        Ok(())
    }

    #[test]
    fn test_put_get_idempotent() {
        let mut index = ChangeIndex::new(HashAlgorithm::Sha256);
        assert_eq!(index.get("a.txt"), None);

        index.put("a.txt", "d1");
        index.put("a.txt", "d1");
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a.txt"), Some("d1"));

        index.put("a.txt", "d2");
        assert_eq!(index.get("a.txt"), Some("d2"));
    }

    #[test]
    fn test_save_load_round_trip() -> Result<(), IndexError> {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::new(temp_dir.path().join("nested/dir/index.json"));

        let mut index = ChangeIndex::new(HashAlgorithm::Sha256);
        index.put("a.txt", "0a1b");
        index.put("docs/readme.md", "ffee");
        index.put("unicode/ñ.txt", "1234");

        store.save(&index)?;
        let loaded = store.load(HashAlgorithm::Sha256)?;
        assert_eq!(loaded, index);

        // Saving what was loaded reproduces the same mapping.
        store.save(&loaded)?;
        assert_eq!(store.load(HashAlgorithm::Sha256)?, index);
        Ok(())
    }

    #[test]
    fn test_save_leaves_no_temp_file() -> Result<(), IndexError> {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::new(temp_dir.path().join("index.json"));
        store.save(&ChangeIndex::new(HashAlgorithm::Sha1))?;

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["index.json"]);
        Ok(())
    }

    #[test]
    fn test_malformed_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        fs::write(&path, "{ not json").unwrap();

        let store = IndexStore::new(&path);
        let err = store.load(HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));

        // Recovery path discards it.
        assert!(store.load_or_empty(HashAlgorithm::Sha256).is_empty());
    }

    #[test]
    fn test_legacy_map_is_sha1() -> Result<(), IndexError> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        fs::write(&path, r#"{"a.txt": "a9993e364706816aba3e25717850c26c9cd0d89d"}"#).unwrap();

        let store = IndexStore::new(&path);
        let index = store.load(HashAlgorithm::Sha256)?;
        assert_eq!(index.algorithm(), HashAlgorithm::Sha1);
        assert_eq!(
            index.get("a.txt"),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        Ok(())
    }

    #[test]
    fn test_algorithm_mismatch_starts_empty() -> Result<(), IndexError> {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::new(temp_dir.path().join("index.json"));

        let mut index = ChangeIndex::new(HashAlgorithm::Sha1);
        index.put("a.txt", "abcd");
        store.save(&index)?;

        let reloaded = store.load_or_empty(HashAlgorithm::Sha256);
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.algorithm(), HashAlgorithm::Sha256);

        assert_eq!(store.load_or_empty(HashAlgorithm::Sha1), index);
        Ok(())
    }

    #[test]
    fn test_other_format_version_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        fs::write(
            &path,
            r#"{"version": 99, "algorithm": "sha256", "files": {"a.txt": "abcd"}}"#,
        )
        .unwrap();

        let store = IndexStore::new(&path);
        match store.load(HashAlgorithm::Sha256).unwrap_err() {
            IndexError::UnsupportedVersion { found, expected, .. } => {
                assert_eq!(found, 99);
                assert_eq!(expected, INDEX_VERSION);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(store.load_or_empty(HashAlgorithm::Sha256).is_empty());
    }
}
