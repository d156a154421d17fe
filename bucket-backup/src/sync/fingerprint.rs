//! Content fingerprints for change detection.
//!
//! Files are streamed through the hasher in fixed-size chunks so memory use
//! does not depend on file size.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Read buffer size used while hashing (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithm used for fingerprints.
///
/// SHA-1 is kept only for compatibility with older indexes; it is
/// collision-weak and should not be chosen for new installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha1,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            other => Err(format!("unsupported hash algorithm '{other}' (expected sha256 or sha1)")),
        }
    }
}

/// Compute the hex digest of a file's content.
pub fn fingerprint(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    fingerprint_with_chunk_size(path, algorithm, CHUNK_SIZE)
}

/// Same as [`fingerprint`] with an explicit read buffer size.
pub fn fingerprint_with_chunk_size(
    path: &Path,
    algorithm: HashAlgorithm,
    chunk_size: usize,
) -> io::Result<String> {
    let file = File::open(path)?;

    match algorithm {
        HashAlgorithm::Sha256 => hash_reader::<Sha256, _>(file, chunk_size),
        HashAlgorithm::Sha1 => hash_reader::<Sha1, _>(file, chunk_size),
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R, chunk_size: usize) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
