//! Rollback Controller
//!
//! Reverts completed steps back to a checkpoint after a run fails. The
//! template's [`RollbackStrategy`] bounds which checkpoints are valid:
//!
//! - `none`: rollback is never offered
//! - `step`: only the most recently completed step, which is itself reverted
//! - `checkpoint`: any completed step, kept while everything after it reverts
//! - `full`: only the first completed step, kept while everything after it reverts
//!
//! Steps are compensated in strict reverse completion order and the
//! execution context is restored to the snapshot taken before the earliest
//! reverted step.

use log::{info, warn};
use serde::Serialize;

use super::step::StepExecutor;
use crate::error::{FlowError, FlowResult};
use crate::workflow::context::ExecutionContext;
use crate::workflow::model::RollbackStrategy;
use crate::workflow::state::{RunState, StepStatus, WorkflowRun};

/// A step reverted by a rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensatedStep {
    pub step_id: String,
    pub index: usize,
    /// Compensation error; the step is rolled back regardless
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validated rollback, computed without touching the run.
#[derive(Debug, Clone)]
pub struct RollbackPlan {
    pub target: String,
    /// History positions to revert, most recent first
    entries: Vec<usize>,
}

impl RollbackPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checkpoints the caller may roll back to under the template's strategy.
pub fn available_targets(run: &WorkflowRun) -> Vec<String> {
    let checkpoints: Vec<&str> = run.checkpoints().map(|e| e.step_id.as_str()).collect();

    let targets: Vec<&str> = match run.template().rollback {
        RollbackStrategy::None => Vec::new(),
        RollbackStrategy::Step => checkpoints.last().copied().into_iter().collect(),
        RollbackStrategy::Checkpoint => checkpoints,
        RollbackStrategy::Full => checkpoints.first().copied().into_iter().collect(),
    };

    targets.into_iter().map(str::to_string).collect()
}

/// Validates a rollback request and works out which steps it reverts.
pub fn plan(run: &WorkflowRun, to_step_id: &str) -> FlowResult<RollbackPlan> {
    let strategy = run.template().rollback;
    if !strategy.offers_rollback() {
        return Err(FlowError::RollbackUnavailable(format!(
            "template '{}' uses rollback strategy '{}'",
            run.template().name,
            strategy
        )));
    }

    if run.state() != RunState::Failed {
        return Err(FlowError::RollbackUnavailable(format!(
            "run is {}, rollback is only offered after a failure",
            run.state()
        )));
    }

    let invalid = |reason: String| FlowError::InvalidRollbackTarget {
        target: to_step_id.to_string(),
        reason,
    };

    if !run.history().iter().any(|e| e.step_id == to_step_id) {
        return Err(invalid("step never completed in this run".to_string()));
    }

    if run.status_of(to_step_id) != Some(StepStatus::Completed) {
        return Err(invalid("step has already been rolled back".to_string()));
    }

    let targets = available_targets(run);
    if !targets.iter().any(|t| t == to_step_id) {
        return Err(invalid(format!(
            "strategy '{}' only allows {:?}",
            strategy, targets
        )));
    }

    let mut entries = Vec::new();
    for (position, entry) in run.history().iter().enumerate().rev() {
        if run.status_of(&entry.step_id) != Some(StepStatus::Completed) {
            continue;
        }
        if entry.step_id == to_step_id {
            if strategy == RollbackStrategy::Step {
                entries.push(position);
            }
            break;
        }
        entries.push(position);
    }

    Ok(RollbackPlan {
        target: to_step_id.to_string(),
        entries,
    })
}

/// Performs a planned rollback against the run.
///
/// Each reverted step is compensated with the context as it stood after
/// that step, then the context is wound back to before it.
pub async fn execute(
    run: &mut WorkflowRun,
    executor: &StepExecutor,
    plan: RollbackPlan,
) -> Vec<CompensatedStep> {
    info!(
        "Rolling back {} step(s) to checkpoint '{}'",
        plan.len(),
        plan.target
    );

    let mut compensated = Vec::with_capacity(plan.len());

    for position in plan.entries {
        let entry = &run.history[position];
        let step_id = entry.step_id.clone();
        let context_before: ExecutionContext = entry.context_before.clone();

        let Some(index) = run.template.step_index(&step_id) else {
            warn!("History references unknown step '{}'", step_id);
            continue;
        };

        let spec = run.template.steps[index].clone();
        let error = match executor.compensate(&spec, &run.context).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Compensation for step '{}' failed: {}", step_id, e);
                Some(e)
            }
        };

        run.context = context_before;
        run.set_status(index, StepStatus::RolledBack);
        info!("Step '{}' rolled back", step_id);

        compensated.push(CompensatedStep {
            step_id,
            index,
            error,
        });
    }

    if let Some(earliest) = compensated.iter().map(|c| c.index).min() {
        run.cursor = Some(earliest);
    }

    compensated
}

/// Validates and performs a rollback in one call.
pub async fn rollback(
    run: &mut WorkflowRun,
    executor: &StepExecutor,
    to_step_id: &str,
) -> FlowResult<Vec<CompensatedStep>> {
    let plan = plan(run, to_step_id)?;
    Ok(execute(run, executor, plan).await)
}
