//! The staged execution pipeline
//!
//! An ordered chain of independently-testable stages. Each stage consumes a
//! context, optionally computes more context, and hands off to its delegate;
//! stages never reach into each other's internals and any stage can be
//! absent in a given assembly. The chain is composed by explicit
//! construction, not inheritance.

mod capture_before;
mod execute;
mod load_previous;
mod store_after;
mod up_to_date;

pub use capture_before::CaptureStateBeforeExecutionStep;
pub use execute::ExecuteStep;
pub use load_previous::LoadPreviousStateStep;
pub use store_after::StoreExecutionStateStep;
pub use up_to_date::SkipUpToDateStep;

use crate::error::Result;
use crate::history::ExecutionHistoryStore;
use crate::state::{AfterExecutionState, BeforeExecutionState};
use crate::work::{UnitOfWork, WorkIdentity};
use convenient_snapshot::fingerprint::FingerprintCollection;
use convenient_snapshot::snapshot::FileSystemSnapshot;
use convenient_snapshot::value::ValueSnapshot;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One stage of the execution pipeline
pub trait Step {
    /// Context this stage consumes
    type Context;
    /// Result this stage produces
    type Output;

    /// Run this stage for one unit of work
    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output>;
}

/// What the scheduler hands the pipeline for one execution attempt
#[derive(Clone)]
pub struct ExecutionRequestContext {
    /// Stable identity of the unit of work
    pub identity: WorkIdentity,
    /// Workspace the work executes in
    pub workspace: PathBuf,
    /// History store, absent when execution history is disabled
    pub history: Option<Arc<dyn ExecutionHistoryStore>>,
    /// Value snapshots an earlier, cheaper stage already computed;
    /// never recomputed during capture
    pub known_value_snapshots: BTreeMap<String, ValueSnapshot>,
    /// File fingerprints an earlier, cheaper stage already computed;
    /// never recomputed during capture
    pub known_file_fingerprints: BTreeMap<String, FingerprintCollection>,
}

impl ExecutionRequestContext {
    /// Minimal request: identity, workspace and history, nothing pre-known
    pub fn new(
        identity: WorkIdentity,
        workspace: impl Into<PathBuf>,
        history: Option<Arc<dyn ExecutionHistoryStore>>,
    ) -> Self {
        Self {
            identity,
            workspace: workspace.into(),
            history,
            known_value_snapshots: BTreeMap::new(),
            known_file_fingerprints: BTreeMap::new(),
        }
    }
}

/// Request context plus the previous run's persisted state
#[derive(Clone)]
pub struct PreviousExecutionContext {
    /// The originating request
    pub request: ExecutionRequestContext,
    /// The previous run's after state, when one was recorded
    pub previous_execution_state: Option<AfterExecutionState>,
}

/// Previous-execution context plus the freshly captured before state
#[derive(Clone)]
pub struct BeforeExecutionContext {
    /// The upstream context
    pub previous: PreviousExecutionContext,
    /// The captured before state; absent when history is disabled, which
    /// downstream stages must treat as "always execute"
    pub before_execution_state: Option<BeforeExecutionState>,
    /// Raw (unfiltered) output snapshots taken during capture, needed by
    /// the after-execution overlap filter
    pub unfiltered_output_snapshots: Option<BTreeMap<String, FileSystemSnapshot>>,
}

impl BeforeExecutionContext {
    /// Identity of the unit of work
    pub fn identity(&self) -> &WorkIdentity {
        &self.previous.request.identity
    }

    /// Workspace the work executes in
    pub fn workspace(&self) -> &Path {
        &self.previous.request.workspace
    }

    /// Input value snapshots for this attempt: captured if available,
    /// otherwise whatever was already known
    pub fn input_value_properties(&self) -> &BTreeMap<String, ValueSnapshot> {
        self.before_execution_state
            .as_ref()
            .map(|state| &state.execution.input_value_properties)
            .unwrap_or(&self.previous.request.known_value_snapshots)
    }

    /// Input file fingerprints for this attempt: captured if available,
    /// otherwise whatever was already known
    pub fn input_file_properties(&self) -> &BTreeMap<String, FingerprintCollection> {
        self.before_execution_state
            .as_ref()
            .map(|state| &state.execution.input_file_properties)
            .unwrap_or(&self.previous.request.known_file_fingerprints)
    }
}

/// How one execution attempt concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Previous outputs were reused; the work did not run
    UpToDate,
    /// The work ran
    Executed {
        /// Why reuse was not possible, in detection order
        rebuild_reasons: Vec<String>,
    },
}

/// Result of driving the pipeline for one unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// How the attempt concluded
    pub outcome: ExecutionOutcome,
    /// The after state now recorded for the unit of work: freshly persisted
    /// when it executed, the reused previous state when up to date, absent
    /// when history is disabled
    pub after_execution_state: Option<AfterExecutionState>,
}

/// The default pipeline assembly:
/// load history → capture before state → up-to-date check → persist after
/// state → execute.
///
/// A build-cache lookup stage would slot between the up-to-date check and
/// the store stage; none ships here since artifact repositories are out of
/// scope.
pub struct ExecutionEngine {
    pipeline: LoadPreviousStateStep<
        CaptureStateBeforeExecutionStep<
            SkipUpToDateStep<StoreExecutionStateStep<ExecuteStep>>,
        >,
    >,
}

impl ExecutionEngine {
    /// Assemble the default pipeline
    pub fn new() -> Self {
        Self {
            pipeline: LoadPreviousStateStep::new(CaptureStateBeforeExecutionStep::new(
                SkipUpToDateStep::new(StoreExecutionStateStep::new(ExecuteStep::new())),
            )),
        }
    }

    /// Run one unit of work through the pipeline
    pub fn execute(
        &self,
        work: &dyn UnitOfWork,
        context: ExecutionRequestContext,
    ) -> Result<ExecutionResult> {
        let result = self.pipeline.execute(work, context)?;
        match &result.outcome {
            ExecutionOutcome::UpToDate => {
                info!(work = %work.display_name(), "up to date, outputs reused")
            }
            ExecutionOutcome::Executed { rebuild_reasons } => {
                info!(
                    work = %work.display_name(),
                    reasons = ?rebuild_reasons,
                    "executed"
                )
            }
        }
        Ok(result)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}
