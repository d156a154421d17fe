//! Filesystem side of a backup run: tree walking and ignore patterns.

pub mod ignore;
pub mod walker;

pub use ignore::IgnoreSet;
pub use walker::{relative_key, walk_directory, FileInfo, WalkOptions};
