//! Configuration management for the backup tool.
//!
//! Settings come from an optional TOML file, a `.env` file and the process
//! environment (environment wins). They are validated once into [`Settings`],
//! which is then passed by reference; nothing else reads the environment.

use crate::executor::FailurePolicy;
use crate::sync::HashAlgorithm;
use crate::utils::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the ignore file looked up next to the executable.
pub const IGNORE_FILE_NAME: &str = ".ignore";

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the tree to back up
    pub backup_folder: PathBuf,

    pub access_key: String,
    pub secret_access_key: String,

    /// Destination bucket
    pub bucket: String,

    /// Key prefix, empty or ending in `/`
    pub upload_root_folder: String,

    pub region: String,

    /// Custom S3-compatible endpoint
    pub endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Change index location; `None` when caching is disabled
    pub cache_file: Option<PathBuf>,

    pub hash_algorithm: HashAlgorithm,

    pub ignore_file: PathBuf,

    pub failure_policy: FailurePolicy,
}

/// Raw settings as read from the TOML file. Every field is optional here;
/// requiredness is checked in [`RawSettings::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawSettings {
    pub backup_folder: Option<String>,
    pub access_key: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
    pub upload_root_folder: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub log_level: Option<String>,
    pub use_cache: Option<FlagValue>,
    pub cache_file: Option<String>,
    pub hash_algorithm: Option<String>,
    pub ignore_file: Option<String>,
    pub continue_on_error: Option<FlagValue>,
}

/// A boolean flag: a TOML bool, or text from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

// Default values
fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    crate::utils::logger::DEFAULT_LEVEL.to_string()
}

fn default_cache_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("bucket-backup").join("index.json"))
}

fn default_ignore_file() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(IGNORE_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(IGNORE_FILE_NAME))
}

impl Settings {
    /// Load and validate settings from all sources.
    ///
    /// `.env` in the working directory is read first but never overrides
    /// variables that are already set.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let raw = match config_file {
            Some(path) => RawSettings::from_file(path)?,
            None => RawSettings::default(),
        };

        raw.with_env(|key| std::env::var(key).ok()).validate()
    }

    pub fn use_cache(&self) -> bool {
        self.cache_file.is_some()
    }
}

impl RawSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment values. `lookup` returns the value of a variable.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let overlay = |slot: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key) {
                *slot = Some(value);
            }
        };
        let overlay_flag = |slot: &mut Option<FlagValue>, key: &str| {
            if let Some(value) = lookup(key) {
                *slot = Some(FlagValue::Text(value));
            }
        };

        overlay(&mut self.backup_folder, "BACKUP_FOLDER");
        overlay(&mut self.access_key, "ACCESS_KEY");
        overlay(&mut self.secret_access_key, "SECRET_ACCESS_KEY");
        overlay(&mut self.bucket, "BUCKET");
        overlay(&mut self.upload_root_folder, "UPLOAD_ROOT_FOLDER");
        overlay(&mut self.region, "AWS_REGION");
        overlay(&mut self.endpoint, "S3_ENDPOINT");
        overlay(&mut self.log_level, "LOG_LEVEL");
        overlay_flag(&mut self.use_cache, "USE_CACHE");
        overlay(&mut self.cache_file, "CACHE_FILE");
        overlay(&mut self.hash_algorithm, "HASH_ALGORITHM");
        overlay(&mut self.ignore_file, "IGNORE_FILE");
        overlay_flag(&mut self.continue_on_error, "CONTINUE_ON_ERROR");

        self
    }

    /// Check required settings and apply defaults.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let access_key = required(self.access_key, "ACCESS_KEY")?;
        let secret_access_key = required(self.secret_access_key, "SECRET_ACCESS_KEY")?;

        let backup_folder = PathBuf::from(required(self.backup_folder, "BACKUP_FOLDER")?);
        if !backup_folder.is_dir() {
            return Err(ConfigError::Invalid {
                key: "BACKUP_FOLDER",
                reason: format!("{} is not a directory", backup_folder.display()),
            });
        }

        let bucket = required(self.bucket, "BUCKET")?;

        let use_cache = parse_flag("USE_CACHE", self.use_cache.as_ref())?;
        let cache_file = if use_cache {
            let path = non_empty(self.cache_file)
                .map(PathBuf::from)
                .or_else(default_cache_file)
                .ok_or(ConfigError::Missing("CACHE_FILE"))?;
            Some(path)
        } else {
            None
        };

        let hash_algorithm = match non_empty(self.hash_algorithm) {
            Some(value) => value.parse::<HashAlgorithm>().map_err(|reason| ConfigError::Invalid {
                key: "HASH_ALGORITHM",
                reason,
            })?,
            None => HashAlgorithm::default(),
        };

        let failure_policy = if parse_flag("CONTINUE_ON_ERROR", self.continue_on_error.as_ref())? {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        };

        Ok(Settings {
            backup_folder,
            access_key,
            secret_access_key,
            bucket,
            upload_root_folder: normalize_prefix(self.upload_root_folder.as_deref().unwrap_or(""))?,
            region: non_empty(self.region).unwrap_or_else(default_region),
            endpoint: non_empty(self.endpoint),
            log_level: non_empty(self.log_level).unwrap_or_else(default_log_level),
            cache_file,
            hash_algorithm,
            ignore_file: non_empty(self.ignore_file)
                .map(PathBuf::from)
                .unwrap_or_else(default_ignore_file),
            failure_policy,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(key))
}

fn parse_flag(key: &'static str, value: Option<&FlagValue>) -> Result<bool, ConfigError> {
    match value {
        Some(FlagValue::Bool(b)) => Ok(*b),
        Some(FlagValue::Text(text)) => parse_bool(key, Some(text)),
        None => Ok(false),
    }
}

/// Parse a boolean flag; unset or empty means false.
fn parse_bool(key: &'static str, value: Option<&str>) -> Result<bool, ConfigError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(false);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{value}'"),
        }),
    }
}

/// Normalize the destination key prefix.
///
/// Surrounding `/` are trimmed and a non-empty prefix gets exactly one
/// trailing `/`. Empty, `.` and `..` segments cannot be stored as object
/// names and are rejected.
pub fn normalize_prefix(prefix: &str) -> Result<String, ConfigError> {
    let prefix = prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        return Ok(String::new());
    }

    if let Some(segment) = prefix
        .split('/')
        .find(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(ConfigError::Invalid {
            key: "UPLOAD_ROOT_FOLDER",
            reason: format!("'{prefix}' contains the invalid segment '{segment}'"),
        });
    }

    Ok(format!("{prefix}/"))
}
