//! Execution state
//!
//! The snapshot bundle for one execution of a unit of work: implementation
//! identity, input value snapshots, input file fingerprints and output tree
//! snapshots. A "before" state is built fresh at the start of every attempt;
//! an "after" state is built once execution completes and is the only state
//! ever persisted, replaced wholesale on the next successful run.

use crate::overlap::{OverlapOutcome, OverlappingOutputs};
use crate::work::ImplementationSnapshot;
use chrono::{DateTime, Utc};
use convenient_snapshot::fingerprint::FingerprintCollection;
use convenient_snapshot::snapshot::FileSystemSnapshot;
use convenient_snapshot::value::ValueSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot bundle shared by before- and after-execution states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Identity of the primary implementation
    pub implementation: ImplementationSnapshot,
    /// Secondary implementation identities, in reported order
    pub additional_implementations: Vec<ImplementationSnapshot>,
    /// Value snapshot per non-file input property
    pub input_value_properties: BTreeMap<String, ValueSnapshot>,
    /// Fingerprint collection per file-based input property
    pub input_file_properties: BTreeMap<String, FingerprintCollection>,
    /// Output tree snapshot per declared output property
    pub output_file_snapshots: BTreeMap<String, FileSystemSnapshot>,
}

/// State captured at the start of an execution attempt
///
/// Owned by the capture stage for the duration of one attempt and handed
/// read-only to downstream stages. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeforeExecutionState {
    /// The captured snapshot bundle; output snapshots are already filtered
    /// when overlapping outputs were detected
    pub execution: ExecutionState,
    /// Overlap detection outcome for this attempt
    pub overlapping_outputs: OverlapOutcome,
}

impl BeforeExecutionState {
    /// Detected overlapping outputs, when detection ran and found any
    pub fn detected_overlapping_outputs(&self) -> Option<&OverlappingOutputs> {
        match &self.overlapping_outputs {
            OverlapOutcome::Overlapping(overlaps) => Some(overlaps),
            OverlapOutcome::NoOverlap | OverlapOutcome::Skipped => None,
        }
    }
}

/// State persisted after a completed execution
///
/// The history store is the single writer; previous-run reads always come
/// from the last persisted after state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfterExecutionState {
    /// The snapshot bundle recorded for the completed run
    pub execution: ExecutionState,
    /// Overlap outcome observed at the start of the run that produced this
    /// state
    pub overlapping_outputs: OverlapOutcome,
    /// Whether the run completed successfully
    pub successful: bool,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}
