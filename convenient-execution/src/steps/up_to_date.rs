//! The incremental short-circuit
//!
//! Compares the captured before state with the previous run's recorded
//! state. When nothing relevant changed, the previous outputs are reused
//! and the rest of the pipeline never runs.

use crate::error::Result;
use crate::state::{BeforeExecutionState, ExecutionState};
use crate::steps::{BeforeExecutionContext, ExecutionOutcome, ExecutionResult, Step};
use crate::work::UnitOfWork;
use std::collections::BTreeMap;
use tracing::debug;

/// Pipeline stage deciding whether the work needs to run at all
pub struct SkipUpToDateStep<D> {
    delegate: D,
}

impl<D> SkipUpToDateStep<D> {
    /// Wrap the next stage
    pub fn new(delegate: D) -> Self {
        Self { delegate }
    }
}

impl<D> Step for SkipUpToDateStep<D>
where
    D: Step<Context = BeforeExecutionContext, Output = ExecutionResult>,
{
    type Context = BeforeExecutionContext;
    type Output = ExecutionResult;

    fn execute(&self, work: &dyn UnitOfWork, context: Self::Context) -> Result<Self::Output> {
        let rebuild_reasons = rebuild_reasons(&context);
        if rebuild_reasons.is_empty() {
            debug!(work = %work.display_name(), "no changes detected, skipping execution");
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome::UpToDate,
                after_execution_state: context.previous.previous_execution_state.clone(),
            });
        }
        for reason in &rebuild_reasons {
            debug!(work = %work.display_name(), reason = %reason, "out of date");
        }

        let mut result = self.delegate.execute(work, context)?;
        result.outcome = ExecutionOutcome::Executed { rebuild_reasons };
        Ok(result)
    }
}

fn rebuild_reasons(context: &BeforeExecutionContext) -> Vec<String> {
    let Some(before) = &context.before_execution_state else {
        return vec!["Change tracking is disabled.".to_string()];
    };
    let Some(previous) = &context.previous.previous_execution_state else {
        return vec!["No history is available.".to_string()];
    };
    if !previous.successful {
        return vec!["Previous execution failed.".to_string()];
    }
    collect_changes(&previous.execution, before)
}

fn collect_changes(previous: &ExecutionState, before: &BeforeExecutionState) -> Vec<String> {
    let current = &before.execution;
    let mut reasons = Vec::new();

    if previous.implementation.type_name != current.implementation.type_name {
        reasons.push(format!(
            "The type of the work has changed from '{}' to '{}'.",
            previous.implementation.type_name, current.implementation.type_name
        ));
    } else if previous.implementation.hash != current.implementation.hash {
        reasons.push(format!(
            "The implementation of '{}' has changed.",
            current.implementation.type_name
        ));
    }
    if previous.additional_implementations != current.additional_implementations {
        reasons.push("One or more additional actions have changed.".to_string());
    }

    compare_keys(
        &previous.input_value_properties,
        &current.input_value_properties,
        "Input property",
        &mut reasons,
    );
    for (name, current_value) in &current.input_value_properties {
        if let Some(previous_value) = previous.input_value_properties.get(name) {
            // Unknown snapshots never compare equal, so untracked values
            // always invalidate
            if previous_value != current_value {
                reasons.push(format!("Value of input property '{name}' has changed."));
            }
        }
    }

    compare_keys(
        &previous.input_file_properties,
        &current.input_file_properties,
        "Input file property",
        &mut reasons,
    );
    for (name, current_files) in &current.input_file_properties {
        let Some(previous_files) = previous.input_file_properties.get(name) else {
            continue;
        };
        if previous_files.strategy_identifier() != current_files.strategy_identifier() {
            debug!(
                property = %name,
                previous = previous_files.strategy_identifier(),
                current = current_files.strategy_identifier(),
                "fingerprinting strategy changed, cannot compare"
            );
            reasons.push(format!(
                "The fingerprinting strategy of input file property '{name}' has changed."
            ));
        } else if previous_files.combined_hash() != current_files.combined_hash() {
            reasons.push(format!("Input file property '{name}' has changed."));
        }
    }

    compare_keys(
        &previous.output_file_snapshots,
        &current.output_file_snapshots,
        "Output property",
        &mut reasons,
    );
    for (name, current_output) in &current.output_file_snapshots {
        if let Some(previous_output) = previous.output_file_snapshots.get(name) {
            if !previous_output.content_equals(current_output) {
                reasons.push(format!("Output property '{name}' has changed."));
            }
        }
    }

    reasons
}

fn compare_keys<V>(
    previous: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
    kind: &str,
    reasons: &mut Vec<String>,
) {
    for name in previous.keys() {
        if !current.contains_key(name) {
            reasons.push(format!("{kind} '{name}' has been removed."));
        }
    }
    for name in current.keys() {
        if !previous.contains_key(name) {
            reasons.push(format!("{kind} '{name}' has been added."));
        }
    }
}
