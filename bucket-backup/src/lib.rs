//! Bucket Backup Library
//!
//! Incrementally copies a directory tree into an object-storage bucket,
//! skipping ignored files and files whose content digest is unchanged since
//! the last run.

pub mod config;
pub mod executor;
pub mod fs;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use executor::{FailurePolicy, IndexHandle, SyncEngine, SyncOptions, SyncReport};
pub use utils::errors::SyncError;
