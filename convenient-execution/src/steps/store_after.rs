//! Records the after-execution state
//!
//! After the work ran, outputs are snapshotted again and the resulting
//! state is persisted so the next run can compare against it. When
//! overlapping outputs were detected, foreign files are filtered out of the
//! recorded snapshots so only content this unit of work produced or owned
//! is attributed to it.

use crate::error::{ExecutionError, Result};
use crate::history::ExecutionHistoryStore;
use crate::overlap::filter_output_after_execution;
use crate::state::{AfterExecutionState, BeforeExecutionState, ExecutionState};
use crate::steps::{BeforeExecutionContext, ExecutionOutcome, ExecutionResult, Step};
use crate::work::{OutputVisitor, UnitOfWork, WorkIdentity};
use chrono::Utc;
use convenient_snapshot::snapshot::FileSystemSnapshot;
use convenient_snapshot::snapshotter::FileSystemSnapshotter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Pipeline stage that snapshots outputs after the work ran and persists
/// the resulting state
pub struct StoreExecutionStateStep<D> {
    snapshotter: FileSystemSnapshotter,
    delegate: D,
}

impl<D> StoreExecutionStateStep<D> {
    /// Wrap the next stage
    pub fn new(delegate: D) -> Self {
        Self {
            snapshotter: FileSystemSnapshotter::new(),
            delegate,
        }
    }
}

impl<D> Step for StoreExecutionStateStep<D>
where
    D: Step<Context = BeforeExecutionContext, Output = ExecutionResult>,
{
    type Context = BeforeExecutionContext;
    type Output = ExecutionResult;

    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output> {
        let identity = context.identity().clone();
        let workspace = context.workspace().to_path_buf();
        let history = context.previous.request.history.clone();
        let before_execution_state = context.before_execution_state.clone();
        let unfiltered_before_outputs = context.unfiltered_output_snapshots.clone();

        let mut result = self.delegate.execute(work, context)?;

        let (Some(history), Some(before)) = (history, before_execution_state) else {
            // nothing was captured, there is nothing coherent to record
            return Ok(result);
        };
        if !matches!(result.outcome, ExecutionOutcome::Executed { .. }) {
            return Ok(result);
        }

        let after_state = self.build_after_state(
            work,
            &workspace,
            before,
            unfiltered_before_outputs.unwrap_or_default(),
        )?;
        store(&history, &identity, after_state.clone())?;
        result.after_execution_state = Some(after_state);
        Ok(result)
    }
}

impl<D> StoreExecutionStateStep<D> {
    fn build_after_state(
        &self,
        work: &dyn UnitOfWork,
        workspace: &Path,
        before: BeforeExecutionState,
        unfiltered_before_outputs: BTreeMap<String, FileSystemSnapshot>,
    ) -> Result<AfterExecutionState> {
        struct Outputs(Vec<(String, PathBuf)>);
        impl OutputVisitor for Outputs {
            fn visit_output_property(&mut self, name: &str, root: &Path) {
                self.0.push((name.to_string(), root.to_path_buf()));
            }
        }
        let mut declared = Outputs(Vec::new());
        work.visit_outputs(workspace, &mut declared);

        let filter_foreign = before.overlapping_outputs.has_overlaps();
        let mut output_file_snapshots = BTreeMap::new();
        for (property, root) in declared.0 {
            let after =
                self.snapshotter
                    .snapshot(&root)
                    .map_err(|source| ExecutionError::OutputSnapshot {
                        property: property.clone(),
                        source,
                    })?;
            let recorded = if filter_foreign {
                filter_output_after_execution(
                    unfiltered_before_outputs.get(&property),
                    before.execution.output_file_snapshots.get(&property),
                    &after,
                )
            } else {
                after
            };
            let _ = output_file_snapshots.insert(property, recorded);
        }

        let overlapping_outputs = before.overlapping_outputs;
        Ok(AfterExecutionState {
            execution: ExecutionState {
                output_file_snapshots,
                ..before.execution
            },
            overlapping_outputs,
            successful: true,
            finished_at: Utc::now(),
        })
    }
}

fn store(
    history: &Arc<dyn ExecutionHistoryStore>,
    identity: &WorkIdentity,
    state: AfterExecutionState,
) -> Result<()> {
    history
        .store(identity, state)
        .map_err(|source| ExecutionError::History {
            identity: identity.to_string(),
            source,
        })?;
    debug!(identity = %identity, "recorded execution state");
    Ok(())
}
