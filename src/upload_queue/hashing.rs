//! SHA256 hashing utilities for deduplication.
//!
//! A file's hash identifies it in the processed ledger, so a re-exported or
//! copied file is never sent twice.

use sha2::{Digest, Sha256};

/// Calculate SHA256 hash of content in memory
pub fn calculate_bytes_hash_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Hash of the first `len` bytes, or `None` when the content is shorter
pub fn calculate_prefix_hash_sha256(content: &[u8], len: u64) -> Option<String> {
    let len = usize::try_from(len).ok()?;
    content.get(..len).map(calculate_bytes_hash_sha256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_content_hash() {
        let hash = calculate_bytes_hash_sha256(b"test content");

        // SHA256 hash should be 64 characters (hex)
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, calculate_bytes_hash_sha256(b"test content"));
    }

    #[test]
    fn test_different_content_different_hash() {
        let hash1 = calculate_bytes_hash_sha256(b"content1");
        let hash2 = calculate_bytes_hash_sha256(b"content2");

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_prefix_hash_matches_earlier_version() {
        let first = b"header\nrow1\n";
        let grown = b"header\nrow1\nrow2\n";

        assert_eq!(
            calculate_prefix_hash_sha256(grown, first.len() as u64),
            Some(calculate_bytes_hash_sha256(first))
        );
        assert_eq!(calculate_prefix_hash_sha256(first, grown.len() as u64), None);
    }
}
