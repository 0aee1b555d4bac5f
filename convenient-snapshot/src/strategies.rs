//! Fingerprinting strategies
//!
//! A strategy is a pure function from root snapshots to a fingerprint
//! collection. Path normalization and directory sensitivity are independent
//! axes; every combination is a plain immutable value, constructed once and
//! passed by value. Identifiers are persisted alongside results and must
//! stay stable across versions.

use crate::fingerprint::{FingerprintCollection, HashingStrategy, LocationFingerprint};
use crate::hash::ContentHash;
use crate::snapshot::{DirectorySnapshot, FileSystemSnapshot, FileSystemSnapshotVisitor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Normalized path recorded for locations whose own path is irrelevant,
/// e.g. the root directory of a name-only property
pub const IGNORED_PATH: &str = "";

/// How to normalize paths when fingerprinting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathNormalization {
    /// Key by absolute path; any move is a change
    Absolute,
    /// Key by path relative to the declared root; tolerates whole-tree moves
    Relative,
    /// Key by file name only; duplicates de-duplicated by absolute path
    NameOnly,
    /// Fold everything to a single constant entry; content never invalidates
    Ignored,
}

/// Whether directory entries are fingerprinted items of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectorySensitivity {
    /// Directories fingerprint as entries, so creating or removing an empty
    /// directory is observable
    FingerprintDirectories,
    /// Only regular files fingerprint; directories are pure structure
    IgnoreDirectories,
}

/// One selectable fingerprinting policy for a file-based property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintingStrategy {
    normalization: PathNormalization,
    directory_sensitivity: DirectorySensitivity,
}

impl FingerprintingStrategy {
    /// Absolute-path normalization, directories fingerprinted
    pub const ABSOLUTE: Self = Self::new(
        PathNormalization::Absolute,
        DirectorySensitivity::FingerprintDirectories,
    );
    /// Relative-path normalization, directories fingerprinted
    pub const RELATIVE: Self = Self::new(
        PathNormalization::Relative,
        DirectorySensitivity::FingerprintDirectories,
    );
    /// Name-only normalization, directories fingerprinted
    pub const NAME_ONLY: Self = Self::new(
        PathNormalization::NameOnly,
        DirectorySensitivity::FingerprintDirectories,
    );
    /// Ignored normalization; only the property's existence is tracked
    pub const IGNORED: Self = Self::new(
        PathNormalization::Ignored,
        DirectorySensitivity::IgnoreDirectories,
    );

    /// Build a strategy from its two axes
    pub const fn new(
        normalization: PathNormalization,
        directory_sensitivity: DirectorySensitivity,
    ) -> Self {
        Self {
            normalization,
            directory_sensitivity,
        }
    }

    /// Copy of this strategy that treats directories as pure structure
    pub const fn ignoring_directories(self) -> Self {
        Self::new(self.normalization, DirectorySensitivity::IgnoreDirectories)
    }

    /// Path normalization axis
    pub fn normalization(&self) -> PathNormalization {
        self.normalization
    }

    /// Directory sensitivity axis
    pub fn directory_sensitivity(&self) -> DirectorySensitivity {
        self.directory_sensitivity
    }

    /// Stable identifier persisted with every collection this strategy
    /// produces
    pub fn identifier(&self) -> &'static str {
        match self.normalization {
            PathNormalization::Absolute => "ABSOLUTE_PATH",
            PathNormalization::Relative => "RELATIVE_PATH",
            PathNormalization::NameOnly => "NAME_ONLY",
            PathNormalization::Ignored => "IGNORED_PATH",
        }
    }

    /// Declared combination rule for the combined hash
    pub fn hashing(&self) -> HashingStrategy {
        // Order-preserving combination exists for classpath-style inputs;
        // all shipped normalizations are order-independent.
        HashingStrategy::Sort
    }

    /// Fingerprint a set of root snapshots into one collection
    pub fn collect_fingerprints(&self, roots: &[FileSystemSnapshot]) -> FingerprintCollection {
        let mut collector = FingerprintCollector {
            strategy: *self,
            depth: 0,
            relative_path: Vec::new(),
            processed: HashSet::new(),
            ignored_emitted: false,
            entries: Vec::new(),
        };
        for root in roots {
            collector.depth = 0;
            collector.relative_path.clear();
            root.accept(&mut collector);
        }
        FingerprintCollection::new(self.identifier(), self.hashing(), collector.entries)
    }
}

/// Visitor that applies one strategy across root snapshots.
///
/// The de-duplication set spans all roots: the first absolute path seen wins,
/// so a file reachable from two declared roots is fingerprinted exactly once.
struct FingerprintCollector {
    strategy: FingerprintingStrategy,
    depth: usize,
    relative_path: Vec<String>,
    processed: HashSet<PathBuf>,
    ignored_emitted: bool,
    entries: Vec<(PathBuf, LocationFingerprint)>,
}

impl FingerprintCollector {
    fn push(&mut self, absolute_path: PathBuf, normalized_path: String, hash: ContentHash) {
        if self.processed.insert(absolute_path.clone()) {
            self.entries.push((
                absolute_path,
                LocationFingerprint {
                    normalized_path,
                    hash,
                },
            ));
        }
    }

    fn relative_of(&self, name: &str) -> String {
        if self.relative_path.len() <= 1 {
            name.to_string()
        } else {
            let mut relative = self.relative_path[1..].join("/");
            relative.push('/');
            relative.push_str(name);
            relative
        }
    }
}

impl FileSystemSnapshotVisitor for FingerprintCollector {
    fn pre_visit_directory(&mut self, dir: &DirectorySnapshot) -> bool {
        let is_root = self.depth == 0;
        let fingerprint_dirs = matches!(
            self.strategy.directory_sensitivity,
            DirectorySensitivity::FingerprintDirectories
        );

        match self.strategy.normalization {
            PathNormalization::Absolute if fingerprint_dirs => {
                self.push(
                    dir.absolute_path.clone(),
                    dir.absolute_path.to_string_lossy().into_owned(),
                    ContentHash::directory_signature(),
                );
            }
            PathNormalization::Relative | PathNormalization::NameOnly if fingerprint_dirs => {
                // The root directory's own name is irrelevant to content
                // identity: a rename of the root must not invalidate
                let normalized = if is_root {
                    IGNORED_PATH.to_string()
                } else if matches!(self.strategy.normalization, PathNormalization::NameOnly) {
                    dir.name.clone()
                } else {
                    self.relative_of(&dir.name)
                };
                self.push(
                    dir.absolute_path.clone(),
                    normalized,
                    ContentHash::directory_signature(),
                );
            }
            _ => {}
        }

        self.relative_path.push(dir.name.clone());
        self.depth += 1;
        true
    }

    fn visit_file(&mut self, snapshot: &FileSystemSnapshot) {
        if let PathNormalization::Ignored = self.strategy.normalization {
            if !self.ignored_emitted {
                self.ignored_emitted = true;
                self.entries.push((
                    snapshot.absolute_path().to_path_buf(),
                    LocationFingerprint {
                        normalized_path: IGNORED_PATH.to_string(),
                        hash: ContentHash::ignored_signature(),
                    },
                ));
            }
            return;
        }

        let hash = match snapshot {
            FileSystemSnapshot::Missing(_) => ContentHash::missing_signature(),
            other => other.hash(),
        };
        let normalized = match self.strategy.normalization {
            PathNormalization::Absolute => snapshot.absolute_path().to_string_lossy().into_owned(),
            PathNormalization::Relative => self.relative_of(snapshot.name()),
            PathNormalization::NameOnly => snapshot.name().to_string(),
            PathNormalization::Ignored => unreachable!("handled above"),
        };
        self.push(snapshot.absolute_path().to_path_buf(), normalized, hash);
    }

    fn post_visit_directory(&mut self, _dir: &DirectorySnapshot) {
        let _ = self.relative_path.pop();
        self.depth -= 1;
    }
}
