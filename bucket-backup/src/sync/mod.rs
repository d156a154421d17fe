//! Change detection: content fingerprints and the persisted change index.

pub mod fingerprint;
pub mod index;

pub use fingerprint::{fingerprint, HashAlgorithm, CHUNK_SIZE};
pub use index::{ChangeIndex, IndexStore};
