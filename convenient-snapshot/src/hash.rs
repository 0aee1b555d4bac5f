//! Content hashing (SHA-256)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Content hash (hex-encoded SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hash a file's content, streaming so large files are never held in memory
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let _ = io::copy(&mut file, &mut hasher)?;
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Wrap an existing hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Marker hash for directory entries in fingerprints
    pub fn directory_signature() -> Self {
        Self::of_bytes(b"DIRECTORY")
    }

    /// Marker hash for missing filesystem locations
    pub fn missing_signature() -> Self {
        Self::of_bytes(b"MISSING")
    }

    /// Marker hash for locations whose content is deliberately not tracked
    pub fn ignored_signature() -> Self {
        Self::of_bytes(b"IGNORED")
    }

    /// Get the hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log output
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(ContentHash::of_bytes(b"data"), ContentHash::of_bytes(b"data"));
        assert_ne!(ContentHash::of_bytes(b"data"), ContentHash::of_bytes(b"other"));
    }

    #[test]
    fn file_hash_matches_byte_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        let from_file = ContentHash::of_file(file.path()).unwrap();
        assert_eq!(from_file, ContentHash::of_bytes(b"hello world"));
    }

    #[test]
    fn signatures_are_distinct() {
        assert_ne!(ContentHash::directory_signature(), ContentHash::missing_signature());
    }
}
