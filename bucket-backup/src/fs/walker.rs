//! Directory traversal for backup runs.
//!
//! Produces every regular file under the backup root together with its
//! relative key. Directories and special files are never yielded.

use crate::utils::SyncError;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links (symlinked files are uploaded under the link's key)
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: true,
        }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative file key (`/`-separated, relative to the root)
    pub key: String,
}

impl FileInfo {
    /// Returns None for anything that is not a regular file.
    fn from_entry(entry: &DirEntry, root: &Path) -> Option<Self> {
        if !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path().to_path_buf();
        Some(Self {
            key: relative_key(root, &path),
            path,
        })
    }
}

/// Derive the relative file key of `path` under `root`.
///
/// Components are joined with `/` on every platform so the same key is used
/// for ignore matching, the change index and the object name.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);

    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree and collect all regular files.
///
/// Entries are visited in file-name order. Per-entry failures (unreadable
/// directory, broken symlink, symlink loop) are returned in place, keyed by
/// the offending path, so the caller decides whether they are fatal.
///
/// # Example
/// ```no_run
/// use bucket_backup::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data"), &WalkOptions::default());
/// println!("Found {} entries", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Vec<Result<FileInfo, SyncError>> {
    let mut files = Vec::new();

    walk_directory_with_callback(root, options, |item| files.push(item));

    files
}

/// Walk a directory tree with a callback for each file or per-entry error.
pub fn walk_directory_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F)
where
    F: FnMut(Result<FileInfo, SyncError>),
{
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    for entry in walker {
        match entry.map(|entry| FileInfo::from_entry(&entry, root)) {
            Ok(Some(file_info)) => callback(Ok(file_info)),
            Ok(None) => {}
            Err(source) => {
                let key = source
                    .path()
                    .map(|p| relative_key(root, p))
                    .filter(|k| !k.is_empty())
                    .unwrap_or_else(|| root.display().to_string());
                callback(Err(SyncError::Walk { key, source }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn keys(items: Vec<Result<FileInfo, SyncError>>) -> Vec<String> {
        items.into_iter().map(|i| i.unwrap().key).collect()
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("subdir/deeper"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;
        fs::write(temp_dir.path().join("subdir/deeper/file3.txt"), b"c3")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(
            keys(files),
            vec!["file1.txt", "subdir/deeper/file3.txt", "subdir/file2.txt"]
        );

        Ok(())
    }

    #[test]
    fn test_only_regular_files_yielded() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("empty_dir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"test")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        let info = files.into_iter().next().unwrap().unwrap();
        assert_eq!(info.key, "file1.txt");
        assert_eq!(info.path, temp_dir.path().join("file1.txt"));
        assert_eq!(
            keys(walk_directory(temp_dir.path(), &WalkOptions::default())),
            vec!["file1.txt"]
        );

        Ok(())
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let root = Path::new("/data/backup");
        let path = root.join("a").join("b").join("c.txt");
        assert_eq!(relative_key(root, &path), "a/b/c.txt");
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_file_is_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("target.txt"), b"data")?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("target.txt"),
            temp_dir.path().join("link.txt"),
        )?;

        let files: Vec<FileInfo> = walk_directory(temp_dir.path(), &WalkOptions::default())
            .into_iter()
            .map(|i| i.unwrap())
            .collect();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].key, "link.txt");
        assert_eq!(fs::read(&files[0].path)?, b"data");

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_broken_symlink_reported_with_key() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("missing.txt"),
            temp_dir.path().join("dangling"),
        )?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 1);
        let err = files.into_iter().next().unwrap().unwrap_err();
        assert_eq!(err.key(), Some("dangling"));

        Ok(())
    }
}
