//! The unit-of-work contract
//!
//! A unit of work is one cacheable piece of buildable work with declared
//! inputs and outputs. The pipeline only ever talks to this trait; what the
//! work actually does (compile, generate, package) is the embedder's
//! business.

use crate::error::ExecutionError;
use convenient_snapshot::hash::ContentHash;
use convenient_snapshot::strategies::FingerprintingStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable identity of a unit of work, the key into the history store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkIdentity {
    /// Unique identity string
    pub unique_id: String,
}

impl WorkIdentity {
    /// Create an identity from a unique string
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
        }
    }
}

impl fmt::Display for WorkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_id)
    }
}

/// Whether overlap detection runs for a unit of work's outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlappingOutputHandling {
    /// Diff start-of-run output content against the previous run's outputs
    DetectOverlaps,
    /// Skip detection unconditionally
    IgnoreOverlaps,
}

/// Identity of the code that implements a unit of work
///
/// When the implementation itself changes, previous results are unusable
/// regardless of inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationSnapshot {
    /// Fully qualified name of the implementing type
    pub type_name: String,
    /// Hash of the implementation's logic
    pub hash: ContentHash,
}

impl ImplementationSnapshot {
    /// Snapshot an implementation from its type name and logic bytes
    pub fn of(type_name: impl Into<String>, logic: &[u8]) -> Self {
        Self {
            type_name: type_name.into(),
            hash: ContentHash::of_bytes(logic),
        }
    }
}

/// Collects implementation identities reported by a unit of work.
///
/// The first reported implementation is the primary one; everything after
/// that is an additional implementation (helper actions and the like).
#[derive(Debug, Default)]
pub struct ImplementationsBuilder {
    implementation: Option<ImplementationSnapshot>,
    additional: Vec<ImplementationSnapshot>,
}

impl ImplementationsBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one implementation identity
    pub fn visit_implementation(&mut self, implementation: ImplementationSnapshot) {
        match self.implementation {
            None => self.implementation = Some(implementation),
            Some(_) => self.additional.push(implementation),
        }
    }

    /// Consume the builder; fails when no primary implementation was
    /// reported, which is a configuration error of the unit of work
    pub fn build(
        self,
        display_name: &str,
    ) -> Result<(ImplementationSnapshot, Vec<ImplementationSnapshot>), ExecutionError> {
        match self.implementation {
            Some(implementation) => Ok((implementation, self.additional)),
            None => Err(ExecutionError::MissingImplementation(
                display_name.to_string(),
            )),
        }
    }
}

/// Receives a unit of work's declared inputs
pub trait InputVisitor {
    /// A non-file input property and its current raw value
    fn visit_value_property(&mut self, name: &str, value: &Value);

    /// A file-based input property: its fingerprinting strategy and the
    /// filesystem roots it covers
    fn visit_file_property(&mut self, name: &str, strategy: FingerprintingStrategy, roots: &[PathBuf]);
}

/// Receives a unit of work's declared outputs
pub trait OutputVisitor {
    /// An output property and the root location it produces
    fn visit_output_property(&mut self, name: &str, root: &Path);
}

/// Everything the unit of work's action gets to see while executing
#[derive(Debug)]
pub struct ExecutionRequest<'a> {
    /// Workspace the work executes in
    pub workspace: &'a Path,
}

/// One unit of buildable work, as seen by the execution pipeline
pub trait UnitOfWork {
    /// Human-readable name for diagnostics
    fn display_name(&self) -> String;

    /// Overlap-handling mode for this work's outputs
    fn overlapping_output_handling(&self) -> OverlappingOutputHandling {
        OverlappingOutputHandling::DetectOverlaps
    }

    /// Report the implementation identities; the first one reported is the
    /// primary implementation
    fn visit_implementations(&self, visitor: &mut ImplementationsBuilder);

    /// Declare input properties
    fn visit_inputs(&self, visitor: &mut dyn InputVisitor);

    /// Declare output properties relative to the workspace
    fn visit_outputs(&self, workspace: &Path, visitor: &mut dyn OutputVisitor);

    /// Run the actual work
    fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
