//! Sync engine - Orchestrates one backup run.
//!
//! Ties together:
//! - File system walker and ignore patterns
//! - Content fingerprints and the change index
//! - The remote uploader
//!
//! Files are processed strictly one at a time. The change index is borrowed
//! mutably for the whole run and persisted once, after the walk completes.

use crate::config::Settings;
use crate::fs::walker::{walk_directory, FileInfo, WalkOptions};
use crate::fs::IgnoreSet;
use crate::sync::{fingerprint, ChangeIndex, HashAlgorithm, IndexStore};
use crate::transfer::format::format_bytes;
use crate::transfer::RemoteUploader;
use crate::utils::{Result, SyncError};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// What happens when a single file cannot be read or uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run at the first failure; the change index is not saved.
    #[default]
    Abort,
    /// Record the failure in the report and carry on; the failed file keeps
    /// its previous index entry and the index is saved at the end.
    Continue,
}

/// Engine options derived from the settings
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Prepended to every relative key; empty or ending in `/`
    pub key_prefix: String,
    pub algorithm: HashAlgorithm,
    pub failure_policy: FailurePolicy,
    pub walk: WalkOptions,
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            key_prefix: settings.upload_root_folder.clone(),
            algorithm: settings.hash_algorithm,
            failure_policy: settings.failure_policy,
            walk: WalkOptions::default(),
        }
    }

    /// Object name for a relative file key: the prefix followed by the key.
    pub fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

/// A file that could not be backed up in continue-on-error mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub skipped_ignored: usize,
    pub skipped_unchanged: usize,
    pub uploaded_bytes: u64,
    pub failed: Vec<FileFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded ({}), {} skipped as ignored, {} skipped as unchanged, {} failed",
            self.uploaded,
            format_bytes(self.uploaded_bytes),
            self.skipped_ignored,
            self.skipped_unchanged,
            self.failed.len()
        )
    }
}

/// Change index state for a cached run.
pub struct IndexHandle<'a> {
    pub index: &'a mut ChangeIndex,
    pub store: &'a IndexStore,
}

/// Decision for one candidate file
enum Decision {
    Upload { digest: Option<String> },
    Unchanged,
}

/// Main sync engine
pub struct SyncEngine<'a> {
    root: PathBuf,
    ignore: &'a IgnoreSet,
    uploader: &'a dyn RemoteUploader,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        ignore: &'a IgnoreSet,
        uploader: &'a dyn RemoteUploader,
        options: SyncOptions,
    ) -> Self {
        Self {
            root: root.into(),
            ignore,
            uploader,
            options,
        }
    }

    /// Execute a run.
    ///
    /// With `cache` set, unchanged files are skipped and the index is saved
    /// once at the end. Without it every non-ignored file is uploaded and no
    /// index is read or written.
    pub async fn run(&self, mut cache: Option<IndexHandle<'_>>) -> Result<SyncReport> {
        info!(
            "Starting sync of {} ({} ignore patterns, cache {})",
            self.root.display(),
            self.ignore.len(),
            if cache.is_some() { "enabled" } else { "disabled" }
        );

        let files = self.scan().await?;
        let mut report = SyncReport::default();

        for item in files {
            let result = match item {
                Ok(file) => {
                    let index = cache.as_mut().map(|c| &mut *c.index);
                    self.process_file(&file, index, &mut report).await
                }
                Err(e) if e.key().is_some_and(|key| self.is_ignored(key)) => {
                    debug!("Ignoring unreadable entry: {}", e);
                    report.skipped_ignored += 1;
                    Ok(())
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                self.handle_failure(e, &mut report)?;
            }
        }

        if let Some(cache) = cache {
            cache.store.save(cache.index)?;
        }

        info!("Sync completed: {}", report);
        Ok(report)
    }

    /// Walk the root in a blocking task.
    async fn scan(&self) -> Result<Vec<Result<FileInfo>>> {
        let root = self.root.clone();
        let options = self.options.walk.clone();
        let files = tokio::task::spawn_blocking(move || walk_directory(&root, &options)).await?;

        debug!("Scanned {}: {} entries", self.root.display(), files.len());
        Ok(files)
    }

    fn is_ignored(&self, key: &str) -> bool {
        !self.ignore.is_empty() && self.ignore.matches(key)
    }

    async fn process_file(
        &self,
        file: &FileInfo,
        index: Option<&mut ChangeIndex>,
        report: &mut SyncReport,
    ) -> Result<()> {
        if self.is_ignored(&file.key) {
            debug!("Ignored: {}", file.key);
            report.skipped_ignored += 1;
            return Ok(());
        }

        let decision = match index.as_deref() {
            Some(index) => self.decide(file, index).await?,
            None => Decision::Upload { digest: None },
        };

        let digest = match decision {
            Decision::Unchanged => {
                debug!("Unchanged: {}", file.key);
                report.skipped_unchanged += 1;
                return Ok(());
            }
            Decision::Upload { digest } => digest,
        };

        let object_key = self.options.object_key(&file.key);
        let sent = self
            .uploader
            .upload(&file.path, &object_key)
            .await
            .map_err(|source| SyncError::Upload {
                key: file.key.clone(),
                source,
            })?;

        info!("Uploaded {} -> {} ({})", file.key, object_key, format_bytes(sent));

        if let (Some(index), Some(digest)) = (index, digest) {
            index.put(file.key.clone(), digest);
        }

        report.uploaded += 1;
        report.uploaded_bytes += sent;
        Ok(())
    }

    /// Compare the file's current digest with the index entry.
    async fn decide(&self, file: &FileInfo, index: &ChangeIndex) -> Result<Decision> {
        let path = file.path.clone();
        let algorithm = self.options.algorithm;
        let digest = tokio::task::spawn_blocking(move || fingerprint(&path, algorithm))
            .await?
            .map_err(|source| SyncError::Fingerprint {
                key: file.key.clone(),
                source,
            })?;

        match index.get(&file.key) {
            Some(previous) if previous == digest => Ok(Decision::Unchanged),
            Some(_) => {
                debug!("Changed: {}", file.key);
                Ok(Decision::Upload { digest: Some(digest) })
            }
            None => {
                debug!("New: {}", file.key);
                Ok(Decision::Upload { digest: Some(digest) })
            }
        }
    }

    fn handle_failure(&self, e: SyncError, report: &mut SyncReport) -> Result<()> {
        let Some(key) = e.key().map(str::to_string) else {
            return Err(e);
        };

        match self.options.failure_policy {
            FailurePolicy::Abort => {
                error!("Aborting sync: {}", e);
                Err(e)
            }
            FailurePolicy::Continue => {
                warn!("{}", e);
                report.failed.push(FileFailure {
                    key,
                    error: e.to_string(),
                });
                Ok(())
            }
        }
    }
}
