//! Custom error types for the backup tool.
//!
//! Configuration errors are fatal and detected before any I/O. Everything that
//! happens during a run is attributable to a single file and carries its key.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid ignore pattern '{pattern}' on line {line}: {source}")]
    Pattern {
        pattern: String,
        line: usize,
        #[source]
        source: globset::Error,
    },
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error on change index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed change index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Change index {path} has format version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("Invalid object name: {0}")]
    Path(#[from] object_store::path::Error),

    #[error("Part upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to enumerate {key}: {source}")]
    Walk {
        key: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to fingerprint {key}: {source}")]
    Fingerprint {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: UploadError,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Relative key of the file this error belongs to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            SyncError::Walk { key, .. }
            | SyncError::Fingerprint { key, .. }
            | SyncError::Upload { key, .. } => Some(key),
            SyncError::Index(_) | SyncError::Task(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
