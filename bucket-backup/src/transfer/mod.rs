//! Transfer of file contents to remote object storage.

pub mod format;
pub mod uploader;

pub use uploader::{ObjectStoreUploader, RemoteUploader};
