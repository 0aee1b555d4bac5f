//! Terminal stage: actually runs the unit of work

use crate::error::{ExecutionError, Result};
use crate::steps::{BeforeExecutionContext, ExecutionOutcome, ExecutionResult, Step};
use crate::work::{ExecutionRequest, UnitOfWork};
use tracing::debug;

/// Runs the work in its workspace; every upstream stage has already decided
/// that executing is necessary.
#[derive(Debug, Default)]
pub struct ExecuteStep;

impl ExecuteStep {
    /// Create the terminal stage
    pub fn new() -> Self {
        Self
    }
}

impl Step for ExecuteStep {
    type Context = BeforeExecutionContext;
    type Output = ExecutionResult;

    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output> {
        let display_name = work.display_name();
        debug!(work = %display_name, workspace = %context.workspace().display(), "executing");
        work.execute(ExecutionRequest {
            workspace: context.workspace(),
        })
        .map_err(|source| ExecutionError::WorkFailed {
            display_name,
            source,
        })?;
        Ok(ExecutionResult {
            outcome: ExecutionOutcome::Executed {
                rebuild_reasons: Vec::new(),
            },
            after_execution_state: None,
        })
    }
}
