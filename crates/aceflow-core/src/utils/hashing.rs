//! Content Fingerprints

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `content` with whitespace runs collapsed to one space
///
/// Memories that differ only in line wrapping or indentation share a hash
/// and are treated as duplicates. Case is preserved.
pub fn content_hash(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
