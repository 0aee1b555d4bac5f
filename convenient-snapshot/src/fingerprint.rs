//! Fingerprint collections
//!
//! A fingerprint attaches a normalized path and a hash to one snapshotted
//! location. A collection gathers the fingerprints of one input property
//! (keyed by absolute path, in visit order) and collapses them to a single
//! combined hash under the strategy's declared combination rule.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Fingerprint of one filesystem location under a normalization strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFingerprint {
    /// Normalized path (absolute, relative, name-only, or an ignored marker)
    pub normalized_path: String,
    /// Content hash, or a marker signature for directories and missing files
    pub hash: ContentHash,
}

/// How a collection's entries combine into one hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashingStrategy {
    /// Sort entries by normalized path before combining, so filesystem
    /// traversal order can never affect the result
    Sort,
    /// Preserve visit order; only for inputs whose order is itself
    /// meaningful (classpath-style)
    KeepOrder,
}

/// Fingerprints of one file-based input property
///
/// Two collections are comparable only when their strategy identifiers
/// match; the identifier is persisted with the collection so a later run
/// can detect that the strategy changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintCollection {
    strategy_identifier: String,
    hashing: HashingStrategy,
    entries: Vec<(PathBuf, LocationFingerprint)>,
    combined_hash: ContentHash,
}

impl FingerprintCollection {
    /// Build a collection, computing the combined hash
    pub fn new(
        strategy_identifier: impl Into<String>,
        hashing: HashingStrategy,
        entries: Vec<(PathBuf, LocationFingerprint)>,
    ) -> Self {
        let combined_hash = combine(&entries, hashing);
        Self {
            strategy_identifier: strategy_identifier.into(),
            hashing,
            entries,
            combined_hash,
        }
    }

    /// Stable identifier of the strategy that produced this collection
    pub fn strategy_identifier(&self) -> &str {
        &self.strategy_identifier
    }

    /// Combination rule used for the combined hash
    pub fn hashing(&self) -> HashingStrategy {
        self.hashing
    }

    /// Single hash summarizing the whole collection
    pub fn combined_hash(&self) -> &ContentHash {
        &self.combined_hash
    }

    /// Entries in visit order, keyed by absolute path
    pub fn entries(&self) -> &[(PathBuf, LocationFingerprint)] {
        &self.entries
    }

    /// Look up the fingerprint recorded for an absolute path
    pub fn get(&self, absolute_path: &Path) -> Option<&LocationFingerprint> {
        self.entries
            .iter()
            .find(|(path, _)| path == absolute_path)
            .map(|(_, fingerprint)| fingerprint)
    }

    /// Number of fingerprinted locations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the property matched no locations at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn combine(entries: &[(PathBuf, LocationFingerprint)], hashing: HashingStrategy) -> ContentHash {
    let mut pairs: Vec<(&str, &ContentHash)> = entries
        .iter()
        .map(|(_, fingerprint)| (fingerprint.normalized_path.as_str(), &fingerprint.hash))
        .collect();
    if let HashingStrategy::Sort = hashing {
        pairs.sort_by(|a, b| a.0.cmp(b.0));
    }

    let mut hasher = Sha256::new();
    for (normalized, hash) in pairs {
        hasher.update(normalized.as_bytes());
        hasher.update(b"=");
        hasher.update(hash.as_str().as_bytes());
        hasher.update(b"|");
    }
    ContentHash::from_hex(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(absolute: &str, normalized: &str, content: &[u8]) -> (PathBuf, LocationFingerprint) {
        (
            PathBuf::from(absolute),
            LocationFingerprint {
                normalized_path: normalized.to_string(),
                hash: ContentHash::of_bytes(content),
            },
        )
    }

    #[test]
    fn sort_hashing_ignores_visit_order() {
        let forward = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r/a", "a", b"1"), entry("/r/b", "b", b"2")],
        );
        let reversed = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r/b", "b", b"2"), entry("/r/a", "a", b"1")],
        );
        assert_eq!(forward.combined_hash(), reversed.combined_hash());
    }

    #[test]
    fn keep_order_hashing_preserves_visit_order() {
        let forward = FingerprintCollection::new(
            "TEST",
            HashingStrategy::KeepOrder,
            vec![entry("/r/a", "a", b"1"), entry("/r/b", "b", b"2")],
        );
        let reversed = FingerprintCollection::new(
            "TEST",
            HashingStrategy::KeepOrder,
            vec![entry("/r/b", "b", b"2"), entry("/r/a", "a", b"1")],
        );
        assert_ne!(forward.combined_hash(), reversed.combined_hash());
    }

    #[test]
    fn sort_hashing_handles_duplicate_normalized_keys() {
        // name-only collections can hold two files sharing a normalized key;
        // combining must stay deterministic without ordering the hashes
        let first = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r1/a", "a", b"1"), entry("/r2/a", "a", b"2")],
        );
        let second = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r1/a", "a", b"1"), entry("/r2/a", "a", b"2")],
        );
        assert_eq!(first.combined_hash(), second.combined_hash());
    }

    #[test]
    fn content_change_changes_combined_hash() {
        let before = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r/a", "a", b"1")],
        );
        let after = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r/a", "a", b"changed")],
        );
        assert_ne!(before.combined_hash(), after.combined_hash());
    }

    #[test]
    fn lookup_by_absolute_path() {
        let collection = FingerprintCollection::new(
            "TEST",
            HashingStrategy::Sort,
            vec![entry("/r/a", "a", b"1")],
        );
        assert!(collection.get(Path::new("/r/a")).is_some());
        assert!(collection.get(Path::new("/r/b")).is_none());
    }
}
