//! Loads the previous run's persisted state

use crate::error::Result;
use crate::steps::{ExecutionRequestContext, PreviousExecutionContext, Step};
use crate::work::UnitOfWork;
use tracing::debug;

/// Pipeline stage that resolves the previous execution state from the
/// history store.
///
/// Missing history is not an error: a first-ever run, a disabled history
/// store and an unreadable record all degrade to "no previous execution",
/// which downstream stages report as everything being new.
pub struct LoadPreviousStateStep<D> {
    delegate: D,
}

impl<D> LoadPreviousStateStep<D> {
    /// Wrap the next stage
    pub fn new(delegate: D) -> Self {
        Self { delegate }
    }
}

impl<D> Step for LoadPreviousStateStep<D>
where
    D: Step<Context = PreviousExecutionContext>,
{
    type Context = ExecutionRequestContext;
    type Output = D::Output;

    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output> {
        let previous_execution_state = match &context.history {
            Some(history) => match history.load(&context.identity) {
                Ok(state) => state,
                Err(err) => {
                    // e.g. a record written by an incompatible version;
                    // recompute everything rather than fail
                    debug!(
                        identity = %context.identity,
                        error = %err,
                        "previous execution state unreadable, treating as missing"
                    );
                    None
                }
            },
            None => None,
        };

        self.delegate.execute(
            work,
            PreviousExecutionContext {
                request: context,
                previous_execution_state,
            },
        )
    }
}
