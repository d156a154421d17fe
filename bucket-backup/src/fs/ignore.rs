//! Ignore patterns for the backup walk.
//!
//! Patterns are shell-style globs matched against relative file keys
//! (e.g. `"photos/2024/img.jpg"`). A key is ignored when it matches any pattern.

use crate::utils::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fmt;
use std::path::Path;

/// Compiled, immutable set of ignore patterns.
#[derive(Clone)]
pub struct IgnoreSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl fmt::Debug for IgnoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreSet")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl IgnoreSet {
    /// Load patterns from an ignore file.
    ///
    /// A missing file yields an empty set. Lines are trimmed, blank lines and
    /// lines starting with `#` are skipped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No ignore file at {}", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let set = Self::parse(&content)?;
        tracing::debug!(
            "Loaded {} ignore patterns from {}",
            set.len(),
            path.display()
        );
        Ok(set)
    }

    /// Parse the line-oriented ignore file format.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let lines = content
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        Self::compile(lines)
    }

    /// Build a set from in-memory patterns.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        Self::compile(owned.iter().enumerate().map(|(idx, p)| (idx + 1, p.as_str())))
    }

    fn compile<'a, I>(lines: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = (usize, &'a str)>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for (line, pattern) in lines {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.to_string(),
                line,
                source,
            })?;
            builder.add(glob);
            patterns.push(pattern.to_string());
        }

        let set = builder.build().map_err(|source| ConfigError::Pattern {
            pattern: patterns.join(", "),
            line: 0,
            source,
        })?;

        Ok(Self { patterns, set })
    }

    /// True when no patterns are configured. Callers use this to skip matching
    /// entirely.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns true if `key` matches at least one pattern.
    pub fn matches(&self, key: &str) -> bool {
        self.set.is_match(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_set_matches_nothing() {
        let set = IgnoreSet::default();
        assert!(set.is_empty());
        assert!(!set.matches("a.txt"));
        assert!(!set.matches("deep/nested/file.log"));
        assert!(!set.matches(""));
    }

    #[test]
    fn test_matches_any_pattern() {
        let set = IgnoreSet::from_patterns(["*.log", "tmp/**"]).unwrap();
        assert!(set.matches("b.log"));
        assert!(set.matches("tmp/cache/x.bin"));
        assert!(!set.matches("a.txt"));
        assert!(!set.matches("src/tmp.rs"));
    }

    #[test]
    fn test_star_crosses_separators() {
        let set = IgnoreSet::from_patterns(["*.log"]).unwrap();
        assert!(set.matches("logs/2024/app.log"));
    }

    #[test]
    fn test_recursive_wildcard() {
        let set = IgnoreSet::from_patterns(["**/node_modules/**"]).unwrap();
        assert!(set.matches("web/node_modules/react/index.js"));
        assert!(set.matches("node_modules/x.js"));
        assert!(!set.matches("web/src/index.js"));
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let set = IgnoreSet::parse("# editor files\n*.swp\n\n   \n  .DS_Store  \n#*.txt\n").unwrap();
        assert_eq!(set.patterns(), &["*.swp".to_string(), ".DS_Store".to_string()]);
        assert!(set.matches(".DS_Store"));
        // Patterns match the whole key, not just the file name.
        assert!(!set.matches("notes/.DS_Store"));
        assert!(!set.matches("readme.txt"));
    }

    #[test]
    fn test_invalid_pattern_rejected_with_line() {
        let err = IgnoreSet::parse("*.ok\n# comment\n[unclosed\n").unwrap_err();
        match err {
            ConfigError::Pattern { pattern, line, .. } => {
                assert_eq!(pattern, "[unclosed");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() -> Result<(), ConfigError> {
        let temp_dir = TempDir::new().unwrap();
        let set = IgnoreSet::load(&temp_dir.path().join(".ignore"))?;
        assert!(set.is_empty());
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<(), ConfigError> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".ignore");
        fs::write(&path, "# build output\ntarget/**\n*.o\n").unwrap();

        let set = IgnoreSet::load(&path)?;
        assert_eq!(set.len(), 2);
        assert!(set.matches("target/debug/app"));
        assert!(set.matches("obj/main.o"));
        Ok(())
    }
}
