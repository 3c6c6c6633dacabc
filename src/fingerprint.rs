//! Content-addressed article identity.
//!
//! An article is identified by the SHA-256 digest of its title and link joined
//! with a pipe. The same digest keys the SQLite store, the last-known marker and
//! the sent-set, so identity survives restarts and is shared by every path.

use sha2::{Digest, Sha256};

/// Separator placed between title and link before hashing.
const SEPARATOR: char = '|';

/// Compute the fingerprint of a `(title, link)` pair as lowercase hex.
///
/// Empty inputs are accepted but collide easily; callers are expected to drop
/// items without a title or link before fingerprinting.
pub fn fingerprint(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(SEPARATOR.to_string().as_bytes());
    hasher.update(link.as_bytes());
    format!("{:x}", hasher.finalize())
}
