//! Condition Evaluation
//!
//! Decides whether a step may run, should be bypassed, or must wait for an
//! external signal. Evaluation is pure: it reads the execution context and
//! the step statuses and never mutates anything, so the driver can call it
//! again every time a suspended step is resumed.
//!
//! Conditions are checked in declaration order and the first one that does
//! not hold decides the verdict.

use log::debug;

use crate::workflow::context::ExecutionContext;
use crate::workflow::model::{Condition, WorkflowTemplate};
use crate::workflow::state::{StepRuntimeState, StepStatus};

/// Verdict for a step's whole condition list.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// All conditions hold
    Proceed,
    /// A condition failed; the step is bypassed
    Skip(String),
    /// A manual approval is pending
    Wait,
}

/// Result of checking a single condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Pass,
    Fail(String),
    Wait,
}

/// Where in the run a step's conditions are being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct StepScope<'a> {
    pub template: &'a WorkflowTemplate,
    pub states: &'a [StepRuntimeState],
    pub index: usize,
}

impl StepScope<'_> {
    fn approved(&self) -> bool {
        self.states.get(self.index).map_or(false, |s| s.approved)
    }

    fn status_at(&self, index: usize) -> Option<StepStatus> {
        self.states.get(index).map(|s| s.status)
    }
}

/// Folds a condition list into a verdict using `check` for each entry.
///
/// Stops at the first condition that does not pass; later entries are
/// never handed to `check`.
pub fn evaluate_with<'c, I, F>(conditions: I, mut check: F) -> Verdict
where
    I: IntoIterator<Item = &'c Condition>,
    F: FnMut(&Condition) -> Check,
{
    for condition in conditions {
        match check(condition) {
            Check::Pass => continue,
            Check::Fail(reason) => return Verdict::Skip(reason),
            Check::Wait => return Verdict::Wait,
        }
    }
    Verdict::Proceed
}

/// Evaluates a step's conditions against the context and step statuses.
pub fn evaluate(
    conditions: &[Condition],
    context: &ExecutionContext,
    scope: &StepScope<'_>,
) -> Verdict {
    let verdict = evaluate_with(conditions, |condition| {
        check_condition(condition, context, scope)
    });
    debug!("Step #{} conditions -> {:?}", scope.index, verdict);
    verdict
}

/// Checks one condition.
pub fn check_condition(
    condition: &Condition,
    context: &ExecutionContext,
    scope: &StepScope<'_>,
) -> Check {
    match condition {
        Condition::PreviousStepSucceeded { step_id } => check_previous(step_id.as_deref(), scope),
        Condition::ScoreAtLeast { threshold } => {
            let score = context.score();
            if score >= *threshold {
                Check::Pass
            } else {
                Check::Fail(format!("score {} is below {}", score, threshold))
            }
        }
        Condition::SecurityClean => match context.security_issues() {
            Some(0) => Check::Pass,
            Some(count) => Check::Fail(format!("{} open security issues", count)),
            None => Check::Fail("no security scan result".to_string()),
        },
        Condition::AllTestsPassed => {
            if context.tests_passed() {
                Check::Pass
            } else {
                Check::Fail("tests have not passed".to_string())
            }
        }
        Condition::ManualApproval => {
            if scope.approved() {
                Check::Pass
            } else {
                Check::Wait
            }
        }
        Condition::ExternalHealthOk {
            min_duration_seconds,
        } => {
            if !context.health_ok() {
                Check::Fail("health check is not passing".to_string())
            } else if context.healthy_seconds() < *min_duration_seconds {
                Check::Fail(format!(
                    "healthy for {}s, need {}s",
                    context.healthy_seconds(),
                    min_duration_seconds
                ))
            } else {
                Check::Pass
            }
        }
        Condition::BranchComparison {
            fact,
            operator,
            value,
        } => {
            let actual = context.number(fact);
            if operator.apply(actual, *value) {
                Check::Pass
            } else {
                Check::Fail(format!(
                    "{} is {}, expected {} {}",
                    fact,
                    actual,
                    operator.symbol(),
                    value
                ))
            }
        }
    }
}

fn check_previous(step_id: Option<&str>, scope: &StepScope<'_>) -> Check {
    let (target, name) = match step_id {
        Some(id) => match scope.template.step_index(id) {
            Some(index) => (index, id.to_string()),
            None => return Check::Fail(format!("unknown step '{}'", id)),
        },
        None => {
            let Some(index) = scope.index.checked_sub(1) else {
                return Check::Fail("no previous step".to_string());
            };
            let name = scope
                .template
                .steps
                .get(index)
                .map(|s| s.id().to_string())
                .unwrap_or_default();
            (index, name)
        }
    };

    match scope.status_at(target) {
        Some(StepStatus::Completed) => Check::Pass,
        Some(status) => Check::Fail(format!("step '{}' is {}", name, status)),
        None => Check::Fail(format!("step '{}' has no state", name)),
    }
}
