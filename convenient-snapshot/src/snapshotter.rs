//! Disk to snapshot conversion
//!
//! Walks a filesystem location and produces an immutable
//! [`FileSystemSnapshot`]. Traversal is lexically sorted so two snapshots of
//! an unchanged tree are structurally identical. This layer never caches
//! across calls; reuse of results belongs to the execution-history store.

use crate::hash::ContentHash;
use crate::snapshot::{
    DirectorySnapshot, FileMetadata, FileSnapshot, FileSystemSnapshot, MissingSnapshot, name_of,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Error produced while snapshotting a location
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading a file or its metadata failed
    #[error("failed to read {path}")]
    Io {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Walking a directory tree failed
    #[error("failed to walk {path}")]
    Walk {
        /// Root of the walk
        path: PathBuf,
        /// Underlying traversal error
        #[source]
        source: walkdir::Error,
    },
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Snapshots filesystem locations
///
/// Stateless; safe to share between threads. Symlinks are resolved to their
/// target content, a broken symlink snapshots as `Missing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemSnapshotter;

impl FileSystemSnapshotter {
    /// Create a snapshotter
    pub fn new() -> Self {
        Self
    }

    /// Snapshot the location at `path`
    pub fn snapshot(&self, path: &Path) -> Result<FileSystemSnapshot> {
        // fs::metadata follows symlinks; NotFound covers both absent paths
        // and broken links
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "snapshotting missing location");
                return Ok(FileSystemSnapshot::missing(path));
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if metadata.is_file() {
            return self.snapshot_file(path, &metadata).map(FileSystemSnapshot::File);
        }

        self.snapshot_directory(path)
    }

    fn snapshot_file(&self, path: &Path, metadata: &fs::Metadata) -> Result<FileSnapshot> {
        let hash = ContentHash::of_file(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(FileSnapshot {
            absolute_path: path.to_path_buf(),
            name: name_of(path),
            hash,
            metadata: Some(FileMetadata {
                length: metadata.len(),
                modified: metadata.modified().ok(),
            }),
        })
    }

    fn snapshot_directory(&self, root: &Path) -> Result<FileSystemSnapshot> {
        // Open directories carried on a stack while their children stream in;
        // entries arrive in lexical order, so children end up sorted without
        // materializing the raw listing first.
        let mut stack: Vec<(PathBuf, String, Vec<FileSystemSnapshot>)> = Vec::new();
        let mut completed: Option<FileSystemSnapshot> = None;

        let walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err)
                    if err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound)
                        && err.path().is_some() =>
                {
                    // broken symlink; snapshots as a missing leaf
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    while stack.len() > err.depth() {
                        close_directory(&mut stack, &mut completed);
                    }
                    let leaf = FileSystemSnapshot::Missing(MissingSnapshot {
                        name: name_of(&path),
                        absolute_path: path,
                    });
                    match stack.last_mut() {
                        Some((_, _, children)) => children.push(leaf),
                        None => completed = Some(leaf),
                    }
                    continue;
                }
                Err(source) => {
                    return Err(SnapshotError::Walk {
                        path: root.to_path_buf(),
                        source,
                    });
                }
            };

            while stack.len() > entry.depth() {
                close_directory(&mut stack, &mut completed);
            }

            let path = entry.path();
            if entry.file_type().is_dir() {
                stack.push((path.to_path_buf(), name_of(path), Vec::new()));
            } else {
                let leaf = match fs::metadata(path) {
                    Ok(metadata) => FileSystemSnapshot::File(self.snapshot_file(path, &metadata)?),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        // broken symlink
                        FileSystemSnapshot::Missing(MissingSnapshot {
                            absolute_path: path.to_path_buf(),
                            name: name_of(path),
                        })
                    }
                    Err(source) => {
                        return Err(SnapshotError::Io {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                };
                match stack.last_mut() {
                    Some((_, _, children)) => children.push(leaf),
                    None => completed = Some(leaf),
                }
            }
        }

        while !stack.is_empty() {
            close_directory(&mut stack, &mut completed);
        }

        // walkdir yields at least the root entry, so this is always set
        completed.ok_or_else(|| SnapshotError::Io {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "directory vanished during snapshot"),
        })
    }
}

fn close_directory(
    stack: &mut Vec<(PathBuf, String, Vec<FileSystemSnapshot>)>,
    completed: &mut Option<FileSystemSnapshot>,
) {
    let Some((path, name, children)) = stack.pop() else {
        return;
    };
    let snapshot = FileSystemSnapshot::Directory(DirectorySnapshot::new(path, name, children));
    match stack.last_mut() {
        Some((_, _, siblings)) => siblings.push(snapshot),
        None => *completed = Some(snapshot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn snapshots_of_unchanged_tree_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.txt", "bee");
        write(dir.path(), "a.txt", "ay");
        write(dir.path(), "sub/c.txt", "sea");

        let snapshotter = FileSystemSnapshotter::new();
        let first = snapshotter.snapshot(dir.path()).unwrap();
        let second = snapshotter.snapshot(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hash(), second.hash());
    }

    #[test]
    fn children_are_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "zebra.txt", "z");
        write(dir.path(), "alpha.txt", "a");

        let snapshot = FileSystemSnapshotter::new().snapshot(dir.path()).unwrap();
        let FileSystemSnapshot::Directory(dir_snapshot) = snapshot else {
            panic!("expected a directory snapshot");
        };
        let names: Vec<_> = dir_snapshot.children.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["alpha.txt", "zebra.txt"]);
    }

    #[test]
    fn missing_location_snapshots_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("nope");
        let snapshot = FileSystemSnapshotter::new().snapshot(&absent).unwrap();
        assert!(matches!(snapshot, FileSystemSnapshot::Missing(_)));
        assert_eq!(snapshot.hash(), ContentHash::missing_signature());
    }

    #[test]
    fn single_file_snapshots_as_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "only.txt", "content");
        let snapshot = FileSystemSnapshotter::new()
            .snapshot(&dir.path().join("only.txt"))
            .unwrap();
        assert_eq!(snapshot.hash(), ContentHash::of_bytes(b"content"));
    }

    #[test]
    fn content_change_changes_tree_hash() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one");
        let snapshotter = FileSystemSnapshotter::new();
        let before = snapshotter.snapshot(dir.path()).unwrap();
        write(dir.path(), "a.txt", "two");
        let after = snapshotter.snapshot(dir.path()).unwrap();
        assert_ne!(before.hash(), after.hash());
    }
}
