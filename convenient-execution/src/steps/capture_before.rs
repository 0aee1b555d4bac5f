//! Captures execution state before the work runs
//!
//! The central stage of the incremental-execution core: it snapshots
//! implementations, input values, input files and current output content
//! into a fresh [`BeforeExecutionState`], detecting overlapping outputs on
//! the way. Read-only with respect to the filesystem; any I/O failure
//! surfaces immediately as a capture failure, retries belong to the
//! scheduler.

use crate::error::{ExecutionError, Result};
use crate::overlap::{OverlapOutcome, OverlappingOutputDetector, filter_output_before_execution};
use crate::state::{BeforeExecutionState, ExecutionState};
use crate::steps::{BeforeExecutionContext, PreviousExecutionContext, Step};
use crate::work::{
    ImplementationsBuilder, InputVisitor, OutputVisitor, OverlappingOutputHandling, UnitOfWork,
};
use convenient_snapshot::fingerprint::FingerprintCollection;
use convenient_snapshot::snapshot::FileSystemSnapshot;
use convenient_snapshot::snapshotter::FileSystemSnapshotter;
use convenient_snapshot::strategies::FingerprintingStrategy;
use convenient_snapshot::value::{ValueSnapshot, ValueSnapshotter};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Pipeline stage that builds the before-execution state
///
/// When the unit of work has no history store configured, capture is skipped
/// entirely and downstream stages receive no before state, which they must
/// treat as "always execute".
pub struct CaptureStateBeforeExecutionStep<D> {
    snapshotter: FileSystemSnapshotter,
    value_snapshotter: ValueSnapshotter,
    overlap_detector: OverlappingOutputDetector,
    delegate: D,
}

impl<D> CaptureStateBeforeExecutionStep<D> {
    /// Wrap the next stage
    pub fn new(delegate: D) -> Self {
        Self {
            snapshotter: FileSystemSnapshotter::new(),
            value_snapshotter: ValueSnapshotter::new(),
            overlap_detector: OverlappingOutputDetector::new(),
            delegate,
        }
    }
}

impl<D> Step for CaptureStateBeforeExecutionStep<D>
where
    D: Step<Context = BeforeExecutionContext>,
{
    type Context = PreviousExecutionContext;
    type Output = D::Output;

    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output> {
        let captured = if context.request.history.is_some() {
            Some(self.capture_execution_state(work, &context)?)
        } else {
            debug!(
                work = %work.display_name(),
                "no execution history, skipping state capture"
            );
            None
        };
        let (before_execution_state, unfiltered_output_snapshots) = match captured {
            Some((state, unfiltered)) => (Some(state), Some(unfiltered)),
            None => (None, None),
        };

        self.delegate.execute(
            work,
            BeforeExecutionContext {
                previous: context,
                before_execution_state,
                unfiltered_output_snapshots,
            },
        )
    }
}

impl<D> CaptureStateBeforeExecutionStep<D> {
    fn capture_execution_state(
        &self,
        work: &dyn UnitOfWork,
        context: &PreviousExecutionContext,
    ) -> Result<(BeforeExecutionState, BTreeMap<String, FileSystemSnapshot>)> {
        let display_name = work.display_name();

        let mut implementations = ImplementationsBuilder::new();
        work.visit_implementations(&mut implementations);
        let (implementation, additional_implementations) =
            implementations.build(&display_name)?;
        debug!(
            work = %display_name,
            implementation = %implementation.type_name,
            additional = additional_implementations.len(),
            "captured implementations"
        );

        let output_snapshots = self.snapshot_outputs(work, &context.request.workspace)?;

        let previous_outputs = context
            .previous_execution_state
            .as_ref()
            .map(|previous| &previous.execution.output_file_snapshots);

        let overlapping_outputs = match work.overlapping_output_handling() {
            OverlappingOutputHandling::DetectOverlaps => match previous_outputs {
                // no previous execution: nothing on disk can overlap with it
                None => OverlapOutcome::NoOverlap,
                Some(previous) => match self.overlap_detector.detect(previous, &output_snapshots) {
                    Some(overlaps) => OverlapOutcome::Overlapping(overlaps),
                    None => OverlapOutcome::NoOverlap,
                },
            },
            OverlappingOutputHandling::IgnoreOverlaps => OverlapOutcome::Skipped,
        };

        let mut inputs = InputCollector {
            snapshotter: self.snapshotter,
            value_snapshotter: self.value_snapshotter,
            known_values: &context.request.known_value_snapshots,
            known_fingerprints: &context.request.known_file_fingerprints,
            values: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
            failure: None,
        };
        work.visit_inputs(&mut inputs);
        if let Some(failure) = inputs.failure {
            return Err(failure);
        }

        let filtered_outputs = if overlapping_outputs.has_overlaps() {
            output_snapshots
                .iter()
                .map(|(property, snapshot)| {
                    let previous = previous_outputs.and_then(|outputs| outputs.get(property));
                    (
                        property.clone(),
                        filter_output_before_execution(previous, snapshot),
                    )
                })
                .collect()
        } else {
            // common path: no overlap, the raw snapshot is the baseline
            output_snapshots.clone()
        };

        let state = BeforeExecutionState {
            execution: ExecutionState {
                implementation,
                additional_implementations,
                input_value_properties: inputs.values,
                input_file_properties: inputs.fingerprints,
                output_file_snapshots: filtered_outputs,
            },
            overlapping_outputs,
        };
        Ok((state, output_snapshots))
    }

    fn snapshot_outputs(
        &self,
        work: &dyn UnitOfWork,
        workspace: &Path,
    ) -> Result<BTreeMap<String, FileSystemSnapshot>> {
        struct Outputs(Vec<(String, PathBuf)>);
        impl OutputVisitor for Outputs {
            fn visit_output_property(&mut self, name: &str, root: &Path) {
                self.0.push((name.to_string(), root.to_path_buf()));
            }
        }
        let mut declared = Outputs(Vec::new());
        work.visit_outputs(workspace, &mut declared);

        let mut snapshots = BTreeMap::new();
        for (property, root) in declared.0 {
            let snapshot =
                self.snapshotter
                    .snapshot(&root)
                    .map_err(|source| ExecutionError::OutputSnapshot {
                        property: property.clone(),
                        source,
                    })?;
            let _ = snapshots.insert(property, snapshot);
        }
        Ok(snapshots)
    }
}

/// Collects declared inputs, reusing already-known snapshots verbatim.
///
/// Visitor methods cannot return errors, so the first snapshot failure is
/// parked and re-raised after the visit.
struct InputCollector<'a> {
    snapshotter: FileSystemSnapshotter,
    value_snapshotter: ValueSnapshotter,
    known_values: &'a BTreeMap<String, ValueSnapshot>,
    known_fingerprints: &'a BTreeMap<String, FingerprintCollection>,
    values: BTreeMap<String, ValueSnapshot>,
    fingerprints: BTreeMap<String, FingerprintCollection>,
    failure: Option<ExecutionError>,
}

impl InputVisitor for InputCollector<'_> {
    fn visit_value_property(&mut self, name: &str, value: &Value) {
        if self.failure.is_some() {
            return;
        }
        let snapshot = match self.known_values.get(name) {
            Some(known) => known.clone(),
            None => self.value_snapshotter.snapshot(value),
        };
        let _ = self.values.insert(name.to_string(), snapshot);
    }

    fn visit_file_property(
        &mut self,
        name: &str,
        strategy: FingerprintingStrategy,
        roots: &[PathBuf],
    ) {
        if self.failure.is_some() {
            return;
        }
        if let Some(known) = self.known_fingerprints.get(name) {
            // fingerprinting is never redone once known for the attempt
            let _ = self.fingerprints.insert(name.to_string(), known.clone());
            return;
        }

        let mut root_snapshots = Vec::with_capacity(roots.len());
        for root in roots {
            match self.snapshotter.snapshot(root) {
                Ok(snapshot) => root_snapshots.push(snapshot),
                Err(source) => {
                    self.failure = Some(ExecutionError::InputSnapshot {
                        property: name.to_string(),
                        source,
                    });
                    return;
                }
            }
        }
        let collection = strategy.collect_fingerprints(&root_snapshots);
        debug!(
            property = name,
            strategy = collection.strategy_identifier(),
            combined = collection.combined_hash().short(),
            "fingerprinted input property"
        );
        let _ = self.fingerprints.insert(name.to_string(), collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use crate::steps::ExecutionRequestContext;
    use crate::work::{ExecutionRequest, ImplementationSnapshot, WorkIdentity};
    use convenient_snapshot::fingerprint::{HashingStrategy, LocationFingerprint};
    use convenient_snapshot::hash::ContentHash;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;

    struct TestWork {
        input_root: PathBuf,
    }

    impl UnitOfWork for TestWork {
        fn display_name(&self) -> String {
            "test work".to_string()
        }
        fn visit_implementations(&self, visitor: &mut ImplementationsBuilder) {
            visitor.visit_implementation(ImplementationSnapshot::of("TestWork", b"v1"));
        }
        fn visit_inputs(&self, visitor: &mut dyn InputVisitor) {
            visitor.visit_value_property("flags", &json!("-O2"));
            visitor.visit_file_property(
                "sources",
                FingerprintingStrategy::RELATIVE,
                &[self.input_root.clone()],
            );
        }
        fn visit_outputs(&self, workspace: &Path, visitor: &mut dyn OutputVisitor) {
            visitor.visit_output_property("out", &workspace.join("out"));
        }
        fn execute(
            &self,
            _request: ExecutionRequest<'_>,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    /// Terminal stub handing the context back out for inspection
    struct Probe;
    impl Step for Probe {
        type Context = BeforeExecutionContext;
        type Output = BeforeExecutionContext;
        fn execute(
            &self,
            _work: &dyn UnitOfWork,
            context: Self::Context,
        ) -> Result<Self::Output> {
            Ok(context)
        }
    }

    fn request(workspace: &Path, with_history: bool) -> ExecutionRequestContext {
        let history: Option<Arc<dyn crate::history::ExecutionHistoryStore>> = if with_history {
            Some(Arc::new(InMemoryHistoryStore::new()))
        } else {
            None
        };
        ExecutionRequestContext::new(WorkIdentity::new("test:work"), workspace, history)
    }

    fn previous_context(workspace: &Path, with_history: bool) -> PreviousExecutionContext {
        PreviousExecutionContext {
            request: request(workspace, with_history),
            previous_execution_state: None,
        }
    }

    fn test_workspace() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input_root = dir.path().join("src");
        fs::create_dir_all(&input_root).unwrap();
        fs::write(input_root.join("main.c"), "int main() {}").unwrap();
        (dir, input_root)
    }

    #[test]
    fn captures_state_when_history_is_present() {
        let (dir, input_root) = test_workspace();
        let step = CaptureStateBeforeExecutionStep::new(Probe);
        let context = step
            .execute(
                &TestWork { input_root },
                previous_context(dir.path(), true),
            )
            .unwrap();

        let unfiltered = context
            .unfiltered_output_snapshots
            .expect("raw output snapshots kept");
        let state = context.before_execution_state.expect("state captured");
        assert_eq!(state.execution.implementation.type_name, "TestWork");
        assert!(state.execution.input_value_properties.contains_key("flags"));
        assert!(state.execution.input_file_properties.contains_key("sources"));
        assert!(state.execution.output_file_snapshots.contains_key("out"));
        assert_eq!(state.overlapping_outputs, OverlapOutcome::NoOverlap);
        // no overlap: the captured baseline is the raw snapshot, unfiltered
        assert_eq!(state.execution.output_file_snapshots, unfiltered);
    }

    #[test]
    fn skips_capture_without_history() {
        let (dir, input_root) = test_workspace();
        let step = CaptureStateBeforeExecutionStep::new(Probe);
        let context = step
            .execute(
                &TestWork { input_root },
                previous_context(dir.path(), false),
            )
            .unwrap();
        assert!(context.before_execution_state.is_none());
        assert!(context.unfiltered_output_snapshots.is_none());
    }

    #[test]
    fn already_known_fingerprints_are_reused_verbatim() {
        let (dir, input_root) = test_workspace();
        let supplied = FingerprintCollection::new(
            "RELATIVE_PATH",
            HashingStrategy::Sort,
            vec![(
                PathBuf::from("/elsewhere/main.c"),
                LocationFingerprint {
                    normalized_path: "main.c".to_string(),
                    hash: ContentHash::of_bytes(b"precomputed"),
                },
            )],
        );

        let mut context = previous_context(dir.path(), true);
        let _ = context
            .request
            .known_file_fingerprints
            .insert("sources".to_string(), supplied.clone());

        let step = CaptureStateBeforeExecutionStep::new(Probe);
        let captured = step
            .execute(&TestWork { input_root }, context)
            .unwrap()
            .before_execution_state
            .expect("state captured");
        assert_eq!(
            captured.execution.input_file_properties["sources"],
            supplied
        );
    }

    #[test]
    fn already_known_value_snapshots_are_reused_verbatim() {
        let (dir, input_root) = test_workspace();
        let supplied = ValueSnapshot::String("precomputed elsewhere".to_string());

        let mut context = previous_context(dir.path(), true);
        let _ = context
            .request
            .known_value_snapshots
            .insert("flags".to_string(), supplied.clone());

        let step = CaptureStateBeforeExecutionStep::new(Probe);
        let captured = step
            .execute(&TestWork { input_root }, context)
            .unwrap()
            .before_execution_state
            .expect("state captured");
        assert_eq!(captured.execution.input_value_properties["flags"], supplied);
    }

    #[test]
    fn missing_implementation_fails_fast() {
        struct NoImplWork;
        impl UnitOfWork for NoImplWork {
            fn display_name(&self) -> String {
                "broken".to_string()
            }
            fn visit_implementations(&self, _visitor: &mut ImplementationsBuilder) {}
            fn visit_inputs(&self, _visitor: &mut dyn InputVisitor) {}
            fn visit_outputs(&self, _workspace: &Path, _visitor: &mut dyn OutputVisitor) {}
            fn execute(
                &self,
                _request: ExecutionRequest<'_>,
            ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let step = CaptureStateBeforeExecutionStep::new(Probe);
        let err = step
            .execute(&NoImplWork, previous_context(dir.path(), true))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::MissingImplementation(_)));
    }
}
