//! Overlapping-output detection and output filtering
//!
//! Two independently-tracked units of work may write into the same output
//! location. Before a run starts, the detector diffs the output content
//! currently on disk against what the previous run of this exact unit of
//! work recorded: anything foreign marks the outputs as overlapping, and the
//! captured output baseline is filtered so foreign content is never
//! mistaken for this unit's own output later. The common no-overlap path
//! never pays the diff cost.

use convenient_snapshot::hash::ContentHash;
use convenient_snapshot::snapshot::{
    DirectorySnapshot, FileSystemSnapshot, FileSystemSnapshotVisitor,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::debug;

/// Output content found at start-of-run that the previous run of this unit
/// of work did not itself produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappingOutputs {
    /// Foreign paths, grouped by output property name
    pub paths_by_property: BTreeMap<String, Vec<PathBuf>>,
}

impl OverlappingOutputs {
    /// All foreign paths across every property
    pub fn all_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths_by_property.values().flatten()
    }
}

/// Outcome of overlap handling for one execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapOutcome {
    /// Detection ran and found nothing foreign
    NoOverlap,
    /// Detection ran and found foreign content
    Overlapping(OverlappingOutputs),
    /// The unit of work opted out of detection
    Skipped,
}

impl OverlapOutcome {
    /// Whether foreign content was found
    pub fn has_overlaps(&self) -> bool {
        matches!(self, Self::Overlapping(_))
    }
}

/// Compares recorded and observed output snapshots for the same declared
/// output locations
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlappingOutputDetector;

impl OverlappingOutputDetector {
    /// Create a detector
    pub fn new() -> Self {
        Self
    }

    /// Diff the previous run's recorded outputs against the outputs observed
    /// at the start of the current run. Returns the foreign paths, or `None`
    /// when everything on disk is attributable to the previous run.
    pub fn detect(
        &self,
        previous: &BTreeMap<String, FileSystemSnapshot>,
        current: &BTreeMap<String, FileSystemSnapshot>,
    ) -> Option<OverlappingOutputs> {
        let mut paths_by_property = BTreeMap::new();
        for (property, current_snapshot) in current {
            let previous_nodes = previous
                .get(property)
                .map(node_index)
                .unwrap_or_default();

            let mut foreign: Vec<PathBuf> = file_index(current_snapshot)
                .into_iter()
                .filter(|(path, hash)| previous_nodes.get(path) != Some(hash))
                .map(|(path, _)| path)
                .collect();
            // a directory the previous run never recorded is foreign too;
            // ancestors whose tree hash merely changed are not
            foreign.extend(
                dir_index(current_snapshot)
                    .into_iter()
                    .filter(|path| !previous_nodes.contains_key(path.as_path())),
            );
            if !foreign.is_empty() {
                foreign.sort();
                debug!(
                    property,
                    count = foreign.len(),
                    "overlapping output content detected"
                );
                let _ = paths_by_property.insert(property.clone(), foreign);
            }
        }

        if paths_by_property.is_empty() {
            None
        } else {
            Some(OverlappingOutputs { paths_by_property })
        }
    }
}

/// Filter the start-of-run output snapshot down to content the previous run
/// itself produced.
///
/// Only called when overlaps were detected; the no-overlap path passes the
/// raw snapshot through without touching it. A property with no previous
/// record keeps nothing.
pub fn filter_output_before_execution(
    previous: Option<&FileSystemSnapshot>,
    current: &FileSystemSnapshot,
) -> FileSystemSnapshot {
    let owned: HashMap<PathBuf, ContentHash> = previous.map(node_index).unwrap_or_default();
    retain(current, &|snapshot| {
        owned.contains_key(snapshot.absolute_path())
    })
    .unwrap_or_else(|| FileSystemSnapshot::missing(current.absolute_path()))
}

/// Filter the after-execution output snapshot down to content this run
/// produced: entries new or changed relative to the start-of-run snapshot,
/// plus the filtered start-of-run baseline.
pub fn filter_output_after_execution(
    before_unfiltered: Option<&FileSystemSnapshot>,
    baseline: Option<&FileSystemSnapshot>,
    after: &FileSystemSnapshot,
) -> FileSystemSnapshot {
    let before: HashMap<PathBuf, ContentHash> =
        before_unfiltered.map(node_index).unwrap_or_default();
    let owned: HashMap<PathBuf, ContentHash> = baseline.map(node_index).unwrap_or_default();
    retain(after, &|snapshot| {
        let path = snapshot.absolute_path();
        match before.get(path) {
            // not present before the run: produced by this run
            None => true,
            // changed by this run, or owned since the previous run
            Some(hash) => *hash != snapshot.hash() || owned.contains_key(path),
        }
    })
    .unwrap_or_else(|| FileSystemSnapshot::missing(after.absolute_path()))
}

/// Recursively keep nodes matching the predicate. Directories survive while
/// they still own surviving children; tree hashes are recomputed.
fn retain(
    snapshot: &FileSystemSnapshot,
    keep: &dyn Fn(&FileSystemSnapshot) -> bool,
) -> Option<FileSystemSnapshot> {
    match snapshot {
        FileSystemSnapshot::Directory(dir) => {
            let children: Vec<FileSystemSnapshot> = dir
                .children
                .iter()
                .filter_map(|child| retain(child, keep))
                .collect();
            if children.is_empty() && !keep(snapshot) {
                None
            } else {
                Some(FileSystemSnapshot::Directory(DirectorySnapshot::new(
                    dir.absolute_path.clone(),
                    dir.name.clone(),
                    children,
                )))
            }
        }
        leaf => keep(leaf).then(|| leaf.clone()),
    }
}

/// Regular-file leaves only, for content comparison
fn file_index(snapshot: &FileSystemSnapshot) -> HashMap<PathBuf, ContentHash> {
    struct Files(HashMap<PathBuf, ContentHash>);
    impl FileSystemSnapshotVisitor for Files {
        fn pre_visit_directory(&mut self, _dir: &DirectorySnapshot) -> bool {
            true
        }
        fn visit_file(&mut self, snapshot: &FileSystemSnapshot) {
            if let FileSystemSnapshot::File(file) = snapshot {
                let _ = self.0.insert(file.absolute_path.clone(), file.hash.clone());
            }
        }
        fn post_visit_directory(&mut self, _dir: &DirectorySnapshot) {}
    }
    let mut files = Files(HashMap::new());
    snapshot.accept(&mut files);
    files.0
}

/// Directory paths only, for structural comparison
fn dir_index(snapshot: &FileSystemSnapshot) -> Vec<PathBuf> {
    struct Dirs(Vec<PathBuf>);
    impl FileSystemSnapshotVisitor for Dirs {
        fn pre_visit_directory(&mut self, dir: &DirectorySnapshot) -> bool {
            self.0.push(dir.absolute_path.clone());
            true
        }
        fn visit_file(&mut self, _snapshot: &FileSystemSnapshot) {}
        fn post_visit_directory(&mut self, _dir: &DirectorySnapshot) {}
    }
    let mut dirs = Dirs(Vec::new());
    snapshot.accept(&mut dirs);
    dirs.0
}

/// Every node including directories, for ownership checks
fn node_index(snapshot: &FileSystemSnapshot) -> HashMap<PathBuf, ContentHash> {
    snapshot.leaf_index()
}
