//! Error taxonomy of the execution core
//!
//! Failures surface synchronously to the pipeline driver; nothing here
//! retries. The one deliberate degradation, an unreadable previous record
//! forcing a recompute, is not an error at all and is logged at debug
//! level where it happens.

use crate::history::HistoryError;
use convenient_snapshot::SnapshotError;
use thiserror::Error;

/// Error produced by the execution pipeline
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The unit of work never reported a primary implementation;
    /// a configuration error, fatal for this execution attempt
    #[error("unit of work '{0}' did not declare an implementation")]
    MissingImplementation(String),

    /// Snapshotting an input property failed
    #[error("failed to snapshot input property '{property}'")]
    InputSnapshot {
        /// Name of the input property
        property: String,
        /// Underlying snapshot failure
        #[source]
        source: SnapshotError,
    },

    /// Snapshotting an output property failed
    #[error("failed to snapshot output property '{property}'")]
    OutputSnapshot {
        /// Name of the output property
        property: String,
        /// Underlying snapshot failure
        #[source]
        source: SnapshotError,
    },

    /// The history store failed to load or persist a record
    #[error("history store failure for '{identity}'")]
    History {
        /// Unit-of-work identity being read or written
        identity: String,
        /// Underlying store failure
        #[source]
        source: HistoryError,
    },

    /// The unit of work's own action failed
    #[error("execution of '{display_name}' failed")]
    WorkFailed {
        /// Display name of the unit of work
        display_name: String,
        /// Failure reported by the work's action
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ExecutionError>;
