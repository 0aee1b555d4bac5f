//! Execution-history store
//!
//! Persistent key-value store mapping unit-of-work identity to the last
//! "after" execution state. Last-writer-wins per identity; a single store
//! call is the atomic unit, no multi-key transactions. The storage engine
//! is deliberately opaque to the pipeline.

use crate::state::AfterExecutionState;
use crate::work::WorkIdentity;
use convenient_snapshot::hash::ContentHash;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Error produced by a history store
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Reading or writing the underlying storage failed
    #[error("failed to access history storage")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded
    #[error("failed to encode or decode execution state")]
    Codec(#[from] serde_json::Error),
}

/// Store of persisted after-execution states, keyed by unit-of-work identity
pub trait ExecutionHistoryStore: Send + Sync {
    /// Load the last persisted state for an identity, if any
    fn load(&self, identity: &WorkIdentity) -> Result<Option<AfterExecutionState>, HistoryError>;

    /// Persist a state, replacing any previous record wholesale
    fn store(&self, identity: &WorkIdentity, state: AfterExecutionState)
    -> Result<(), HistoryError>;

    /// Drop the record for an identity
    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError>;
}

/// In-memory history store
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Mutex<HashMap<String, AfterExecutionState>>,
}

impl InMemoryHistoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionHistoryStore for InMemoryHistoryStore {
    fn load(&self, identity: &WorkIdentity) -> Result<Option<AfterExecutionState>, HistoryError> {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        Ok(records.get(&identity.unique_id).cloned())
    }

    fn store(
        &self,
        identity: &WorkIdentity,
        state: AfterExecutionState,
    ) -> Result<(), HistoryError> {
        let mut records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        let _ = records.insert(identity.unique_id.clone(), state);
        Ok(())
    }

    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError> {
        let mut records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        let _ = records.remove(&identity.unique_id);
        Ok(())
    }
}

/// File-backed history store: one JSON record per identity
///
/// File names are the SHA-256 of the identity so arbitrary identity strings
/// never leak into paths.
#[derive(Debug)]
pub struct JsonFileHistoryStore {
    directory: PathBuf,
}

impl JsonFileHistoryStore {
    /// Create a store rooted at `directory` (created lazily on first write)
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn record_path(&self, identity: &WorkIdentity) -> PathBuf {
        let key = ContentHash::of_bytes(identity.unique_id.as_bytes());
        self.directory.join(format!("{}.json", key.as_str()))
    }
}

impl ExecutionHistoryStore for JsonFileHistoryStore {
    fn load(&self, identity: &WorkIdentity) -> Result<Option<AfterExecutionState>, HistoryError> {
        let path = self.record_path(identity);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state = serde_json::from_str(&json)?;
        Ok(Some(state))
    }

    fn store(
        &self,
        identity: &WorkIdentity,
        state: AfterExecutionState,
    ) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.directory)?;
        let path = self.record_path(identity);
        let json = serde_json::to_string_pretty(&state)?;
        fs::write(&path, json)?;
        debug!(identity = %identity, path = %path.display(), "persisted execution state");
        Ok(())
    }

    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError> {
        match fs::remove_file(self.record_path(identity)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::OverlapOutcome;
    use crate::state::{BeforeExecutionState, ExecutionState};
    use crate::work::ImplementationSnapshot;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_state() -> AfterExecutionState {
        AfterExecutionState {
            execution: ExecutionState {
                implementation: ImplementationSnapshot::of("TestWork", b"v1"),
                additional_implementations: Vec::new(),
                input_value_properties: BTreeMap::new(),
                input_file_properties: BTreeMap::new(),
                output_file_snapshots: BTreeMap::new(),
            },
            overlapping_outputs: OverlapOutcome::NoOverlap,
            successful: true,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemoryHistoryStore::new();
        let identity = WorkIdentity::new("compile:main");
        assert!(store.load(&identity).unwrap().is_none());

        let state = sample_state();
        store.store(&identity, state.clone()).unwrap();
        assert_eq!(store.load(&identity).unwrap(), Some(state));

        store.remove(&identity).unwrap();
        assert!(store.load(&identity).unwrap().is_none());
    }

    #[test]
    fn json_file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistoryStore::new(dir.path().join("history"));
        let identity = WorkIdentity::new("compile:main");
        assert!(store.load(&identity).unwrap().is_none());

        let state = sample_state();
        store.store(&identity, state.clone()).unwrap();
        assert_eq!(store.load(&identity).unwrap(), Some(state));
    }

    #[test]
    fn records_are_replaced_wholesale() {
        let store = InMemoryHistoryStore::new();
        let identity = WorkIdentity::new("compile:main");
        store.store(&identity, sample_state()).unwrap();

        let mut replacement = sample_state();
        replacement.successful = false;
        store.store(&identity, replacement.clone()).unwrap();
        assert_eq!(store.load(&identity).unwrap(), Some(replacement));
    }

    #[test]
    fn before_state_reports_overlaps_only_when_detected() {
        let before = BeforeExecutionState {
            execution: sample_state().execution,
            overlapping_outputs: OverlapOutcome::Skipped,
        };
        assert!(before.detected_overlapping_outputs().is_none());
    }
}
