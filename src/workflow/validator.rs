//! Template Validation
//!
//! Structural checks run when a run starts, not when a template is stored,
//! so templates referencing kinds the embedding application cannot run yet
//! can still be saved to the registry.
//!
//! - Template has steps
//! - Step ids are unique and non-empty
//! - Every step kind has a registered operation
//! - Condition references point at earlier steps
//! - Score thresholds are sane

use std::collections::HashSet;

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Condition, StepKind, WorkflowTemplate};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Template has no steps")]
    EmptyTemplate,

    #[error("Step has empty or whitespace-only ID")]
    EmptyStepId,

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("Step '{step}' uses kind '{kind}' but no operation is registered for it")]
    MissingOperation { step: String, kind: StepKind },

    #[error("Step '{step}' references unknown step '{reference}'")]
    UnknownReference { step: String, reference: String },

    #[error("Step '{step}' references '{reference}', which does not run before it")]
    ForwardReference { step: String, reference: String },

    #[error("Step '{step}' has an invalid score threshold: {threshold}")]
    InvalidThreshold { step: String, threshold: f64 },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validates one step's conditions against the steps that precede it.
fn validate_conditions(
    template: &WorkflowTemplate,
    index: usize,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let step = &template.steps[index];

    for condition in &step.conditions {
        match condition {
            Condition::PreviousStepSucceeded {
                step_id: Some(reference),
            } => match template.step_index(reference) {
                None => errors.push(ValidationError::UnknownReference {
                    step: step.id().to_string(),
                    reference: reference.clone(),
                }),
                Some(target) if target >= index => {
                    errors.push(ValidationError::ForwardReference {
                        step: step.id().to_string(),
                        reference: reference.clone(),
                    })
                }
                Some(_) => {}
            },
            Condition::PreviousStepSucceeded { step_id: None } if index == 0 => {
                warn!(
                    "Step '{}' requires a previous step but is first; it will always be skipped",
                    step.id()
                );
            }
            Condition::ScoreAtLeast { threshold } => {
                if !threshold.is_finite() || *threshold < 0.0 || *threshold > 100.0 {
                    errors.push(ValidationError::InvalidThreshold {
                        step: step.id().to_string(),
                        threshold: *threshold,
                    });
                }
            }
            _ => {}
        }
    }

    errors
}

/// Validates a template before a run starts.
///
/// `has_operation` reports whether the embedding application can run a
/// given step kind. All problems are collected; a single problem is
/// returned as-is, several as [`ValidationError::Multiple`].
pub fn validate_template<F>(
    template: &WorkflowTemplate,
    has_operation: F,
) -> Result<(), ValidationError>
where
    F: Fn(StepKind) -> bool,
{
    info!(
        "Validating template '{}' with {} steps",
        template.name,
        template.len()
    );

    if template.is_empty() {
        return Err(ValidationError::EmptyTemplate);
    }

    let mut errors = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (index, step) in template.steps.iter().enumerate() {
        if step.id().is_empty() {
            errors.push(ValidationError::EmptyStepId);
            continue;
        }

        if !seen_ids.insert(step.id()) {
            errors.push(ValidationError::DuplicateStepId(step.id().to_string()));
        }

        if !has_operation(step.kind) {
            errors.push(ValidationError::MissingOperation {
                step: step.id().to_string(),
                kind: step.kind,
            });
        }

        errors.extend(validate_conditions(template, index));

        if step.conditions.is_empty() {
            debug!("Step '{}' is ungated", step.id());
        }
    }

    match errors.len() {
        0 => {
            info!("Template '{}' validated", template.name);
            Ok(())
        }
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::StepSpec;

    fn any_kind(_: StepKind) -> bool {
        true
    }

    #[test]
    fn test_empty_template() {
        let template = WorkflowTemplate::new("empty", "");
        assert_eq!(
            validate_template(&template, any_kind),
            Err(ValidationError::EmptyTemplate)
        );
    }

    #[test]
    fn test_valid_template() {
        let template = WorkflowTemplate::new("ok", "")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::RunTests).with_id("test"))
            .with_step(StepSpec::new(StepKind::Commit).when(Condition::step_succeeded("test")));

        assert!(validate_template(&template, any_kind).is_ok());
    }

    #[test]
    fn test_duplicate_step_id() {
        let template = WorkflowTemplate::new("dup", "")
            .with_step(StepSpec::new(StepKind::Build))
            .with_step(StepSpec::new(StepKind::Build));

        assert_eq!(
            validate_template(&template, any_kind),
            Err(ValidationError::DuplicateStepId("build".to_string()))
        );
    }

    #[test]
    fn test_missing_operation() {
        let template = WorkflowTemplate::new("deploy", "")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::DeployProduction));

        let result = validate_template(&template, |kind| kind == StepKind::Init);
        assert!(matches!(
            result,
            Err(ValidationError::MissingOperation { kind: StepKind::DeployProduction, .. })
        ));
    }

    #[test]
    fn test_unknown_and_forward_references() {
        let template = WorkflowTemplate::new("refs", "")
            .with_step(StepSpec::new(StepKind::Init).when(Condition::step_succeeded("build")))
            .with_step(StepSpec::new(StepKind::Build))
            .with_step(StepSpec::new(StepKind::Commit).when(Condition::step_succeeded("nope")));

        match validate_template(&template, any_kind) {
            Err(ValidationError::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(errors[0], ValidationError::ForwardReference { .. }));
                assert!(matches!(errors[1], ValidationError::UnknownReference { .. }));
            }
            other => panic!("expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_forward() {
        let template = WorkflowTemplate::new("self", "")
            .with_step(StepSpec::new(StepKind::Build).when(Condition::step_succeeded("build")));

        assert!(matches!(
            validate_template(&template, any_kind),
            Err(ValidationError::ForwardReference { .. })
        ));
    }

    #[test]
    fn test_invalid_threshold() {
        let template = WorkflowTemplate::new("score", "")
            .with_step(StepSpec::new(StepKind::Build).when(Condition::score_at_least(150.0)));

        assert!(matches!(
            validate_template(&template, any_kind),
            Err(ValidationError::InvalidThreshold { .. })
        ));

        let nan = WorkflowTemplate::new("nan", "")
            .with_step(StepSpec::new(StepKind::Build).when(Condition::score_at_least(f64::NAN)));
        assert!(validate_template(&nan, any_kind).is_err());
    }

    #[test]
    fn test_first_step_with_implicit_previous_is_allowed() {
        let template = WorkflowTemplate::new("first", "")
            .with_step(StepSpec::new(StepKind::Build).when(Condition::previous_step()));

        assert!(validate_template(&template, any_kind).is_ok());
    }

    #[test]
    fn test_multiple_error_message() {
        let err = ValidationError::Multiple(vec![
            ValidationError::EmptyStepId,
            ValidationError::DuplicateStepId("x".to_string()),
        ]);
        assert_eq!(
            err.to_string(),
            "Step has empty or whitespace-only ID; Duplicate step ID: 'x'"
        );
    }
}
