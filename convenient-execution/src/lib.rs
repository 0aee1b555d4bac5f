//! Incremental execution engine for user-defined units of work
//!
//! A unit of work declares its implementation, input values, input files
//! and output locations through the [`work::UnitOfWork`] trait. The
//! [`steps::ExecutionEngine`] runs it through a staged pipeline: load the
//! previously recorded state, capture the current state (snapshots,
//! fingerprints and overlap detection via `convenient-snapshot`), skip the
//! work entirely when nothing changed, and otherwise execute it and record
//! the new state for the next run.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod history;
pub mod overlap;
pub mod state;
pub mod steps;
pub mod work;

pub use error::{ExecutionError, Result};
pub use history::{ExecutionHistoryStore, InMemoryHistoryStore, JsonFileHistoryStore};
pub use overlap::{OverlapOutcome, OverlappingOutputs};
pub use state::{AfterExecutionState, BeforeExecutionState, ExecutionState};
pub use steps::{ExecutionEngine, ExecutionOutcome, ExecutionRequestContext, ExecutionResult};
pub use work::{
    ExecutionRequest, ImplementationSnapshot, InputVisitor, OutputVisitor,
    OverlappingOutputHandling, UnitOfWork, WorkIdentity,
};
