//! Immutable filesystem snapshot model
//!
//! A snapshot is a tree describing the structure and content of one
//! filesystem location at a point in time. File identity is the content
//! hash; directory identity is a tree hash derived from the children's
//! names and hashes, never from timestamps.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Cached file metadata. Never part of snapshot identity or equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File length in bytes
    pub length: u64,
    /// Last modification time, when available
    pub modified: Option<SystemTime>,
}

/// Snapshot of a regular file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Absolute path of the file
    pub absolute_path: PathBuf,
    /// File name
    pub name: String,
    /// Content hash
    pub hash: ContentHash,
    /// Cached metadata (excluded from equality)
    pub metadata: Option<FileMetadata>,
}

impl PartialEq for FileSnapshot {
    fn eq(&self, other: &Self) -> bool {
        // metadata is a cache, not identity
        self.absolute_path == other.absolute_path
            && self.name == other.name
            && self.hash == other.hash
    }
}

impl Eq for FileSnapshot {}

/// Snapshot of a directory and its children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Absolute path of the directory
    pub absolute_path: PathBuf,
    /// Directory name
    pub name: String,
    /// Children in lexical order by name
    pub children: Vec<FileSystemSnapshot>,
    /// Hash derived from the children's names and hashes
    pub tree_hash: ContentHash,
}

impl DirectorySnapshot {
    /// Build a directory snapshot, computing the tree hash from the children.
    /// Children must already be in lexical order by name.
    pub fn new(absolute_path: PathBuf, name: String, children: Vec<FileSystemSnapshot>) -> Self {
        let mut hasher = Sha256::new();
        for child in &children {
            hasher.update(child.name().as_bytes());
            hasher.update(b"=");
            hasher.update(child.hash().as_str().as_bytes());
            hasher.update(b"|");
        }
        let tree_hash = ContentHash::from_hex(format!("{:x}", hasher.finalize()));
        Self {
            absolute_path,
            name,
            children,
            tree_hash,
        }
    }
}

/// Snapshot of a location with nothing at it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingSnapshot {
    /// Absolute path of the missing location
    pub absolute_path: PathBuf,
    /// Name the location would have
    pub name: String,
}

/// Immutable snapshot of one filesystem location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSystemSnapshot {
    /// A regular file
    File(FileSnapshot),
    /// A directory tree
    Directory(DirectorySnapshot),
    /// Nothing exists at the location
    Missing(MissingSnapshot),
}

impl FileSystemSnapshot {
    /// Snapshot of a missing location
    pub fn missing(absolute_path: impl Into<PathBuf>) -> Self {
        let absolute_path = absolute_path.into();
        let name = name_of(&absolute_path);
        Self::Missing(MissingSnapshot {
            absolute_path,
            name,
        })
    }

    /// Absolute path of the snapshotted location
    pub fn absolute_path(&self) -> &Path {
        match self {
            Self::File(file) => &file.absolute_path,
            Self::Directory(dir) => &dir.absolute_path,
            Self::Missing(missing) => &missing.absolute_path,
        }
    }

    /// Name of the snapshotted location
    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Directory(dir) => &dir.name,
            Self::Missing(missing) => &missing.name,
        }
    }

    /// Identity hash of this node: content hash for files, tree hash for
    /// directories, the missing signature otherwise
    pub fn hash(&self) -> ContentHash {
        match self {
            Self::File(file) => file.hash.clone(),
            Self::Directory(dir) => dir.tree_hash.clone(),
            Self::Missing(_) => ContentHash::missing_signature(),
        }
    }

    /// Content equality independent of path
    pub fn content_equals(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }

    /// Drive a visitor over the tree in depth-first lexical order
    pub fn accept<V: FileSystemSnapshotVisitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            Self::Directory(dir) => {
                if visitor.pre_visit_directory(dir) {
                    for child in &dir.children {
                        child.accept(visitor);
                    }
                    visitor.post_visit_directory(dir);
                }
            }
            other => visitor.visit_file(other),
        }
    }

    /// Flatten into an `absolute path -> hash` map over every node,
    /// for structural diffing
    pub fn leaf_index(&self) -> HashMap<PathBuf, ContentHash> {
        struct Indexer(HashMap<PathBuf, ContentHash>);
        impl FileSystemSnapshotVisitor for Indexer {
            fn pre_visit_directory(&mut self, dir: &DirectorySnapshot) -> bool {
                let _ = self
                    .0
                    .insert(dir.absolute_path.clone(), dir.tree_hash.clone());
                true
            }
            fn visit_file(&mut self, snapshot: &FileSystemSnapshot) {
                if !matches!(snapshot, FileSystemSnapshot::Missing(_)) {
                    let _ = self
                        .0
                        .insert(snapshot.absolute_path().to_path_buf(), snapshot.hash());
                }
            }
            fn post_visit_directory(&mut self, _dir: &DirectorySnapshot) {}
        }
        let mut indexer = Indexer(HashMap::new());
        self.accept(&mut indexer);
        indexer.0
    }
}

/// Visitor over a snapshot tree
///
/// `visit_file` receives both regular files and missing leaves, so
/// fingerprinting strategies never need to re-walk the tree themselves.
pub trait FileSystemSnapshotVisitor {
    /// Called before a directory's children; return false to skip the subtree
    fn pre_visit_directory(&mut self, dir: &DirectorySnapshot) -> bool;
    /// Called for files and missing locations
    fn visit_file(&mut self, snapshot: &FileSystemSnapshot);
    /// Called after a directory's children
    fn post_visit_directory(&mut self, dir: &DirectorySnapshot);
}

pub(crate) fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &[u8]) -> FileSystemSnapshot {
        let path = PathBuf::from(path);
        let name = name_of(&path);
        FileSystemSnapshot::File(FileSnapshot {
            absolute_path: path,
            name,
            hash: ContentHash::of_bytes(content),
            metadata: None,
        })
    }

    fn dir(path: &str, children: Vec<FileSystemSnapshot>) -> FileSystemSnapshot {
        let path = PathBuf::from(path);
        let name = name_of(&path);
        FileSystemSnapshot::Directory(DirectorySnapshot::new(path, name, children))
    }

    #[test]
    fn file_content_equality_ignores_path() {
        let a = file("/a/data.txt", b"same");
        let b = file("/b/data.txt", b"same");
        assert!(a.content_equals(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn metadata_is_not_identity() {
        let mut a = file("/a/data.txt", b"same");
        let b = file("/a/data.txt", b"same");
        if let FileSystemSnapshot::File(f) = &mut a {
            f.metadata = Some(FileMetadata {
                length: 4,
                modified: Some(SystemTime::now()),
            });
        }
        assert_eq!(a, b);
    }

    #[test]
    fn tree_hash_derived_from_children() {
        let a = dir("/root", vec![file("/root/a.txt", b"one")]);
        let b = dir("/root", vec![file("/root/a.txt", b"one")]);
        let c = dir("/root", vec![file("/root/a.txt", b"two")]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn visitor_sees_files_in_order() {
        let tree = dir(
            "/root",
            vec![
                file("/root/a.txt", b"a"),
                dir("/root/sub", vec![file("/root/sub/b.txt", b"b")]),
            ],
        );

        struct Names(Vec<String>);
        impl FileSystemSnapshotVisitor for Names {
            fn pre_visit_directory(&mut self, _dir: &DirectorySnapshot) -> bool {
                true
            }
            fn visit_file(&mut self, snapshot: &FileSystemSnapshot) {
                self.0.push(snapshot.name().to_string());
            }
            fn post_visit_directory(&mut self, _dir: &DirectorySnapshot) {}
        }
        let mut names = Names(Vec::new());
        tree.accept(&mut names);
        assert_eq!(names.0, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn leaf_index_covers_all_nodes() {
        let tree = dir(
            "/root",
            vec![
                file("/root/a.txt", b"a"),
                dir("/root/sub", vec![file("/root/sub/b.txt", b"b")]),
            ],
        );
        let index = tree.leaf_index();
        assert_eq!(index.len(), 4);
        assert!(index.contains_key(Path::new("/root/sub/b.txt")));
        assert!(index.contains_key(Path::new("/root/sub")));
    }
}
