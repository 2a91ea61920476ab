//! Stable digests used as dedup and change-detection keys.

use sha2::{Digest, Sha256};

/// Length of a content hash in hex characters.
pub const CONTENT_HASH_LEN: usize = 16;

/// Dedup key of a normalized URL within a version: full SHA-256 hex.
pub fn url_hash(normalized_url: &str) -> String {
    hex::encode(Sha256::digest(normalized_url.as_bytes()))
}

/// Change-detection key of extracted text: first 16 hex chars of SHA-256.
///
/// Also used for chunk text, where it keys the per-version chunk uniqueness.
pub fn content_hash(text: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest.truncate(CONTENT_HASH_LEN);
    digest
}
