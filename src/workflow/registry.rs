//! Template Registry
//!
//! Catalog of built-in and user-authored templates. Reads hand out shared
//! snapshots; writes take the lock only for the upsert itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};
use once_cell::sync::Lazy;

use super::model::{Condition, RollbackStrategy, StepKind, StepSpec, WorkflowTemplate};
use super::parser::load_templates;
use crate::error::{FlowError, FlowResult};

/// Templates shipped with the crate.
pub static BUILTIN_TEMPLATES: Lazy<Vec<WorkflowTemplate>> = Lazy::new(|| {
    vec![
        WorkflowTemplate::new("code-review", "Analyze, scan and review a change before committing")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::AnalyzeCode))
            .with_step(StepSpec::new(StepKind::SecurityScan))
            .with_step(
                StepSpec::new(StepKind::CodeReview)
                    .when(Condition::score_at_least(70.0))
                    .when(Condition::SecurityClean),
            )
            .with_step(
                StepSpec::new(StepKind::Commit)
                    .when(Condition::step_succeeded("code_review"))
                    .when(Condition::ManualApproval),
            )
            .with_rollback(RollbackStrategy::Step),
        WorkflowTemplate::new("ci-pipeline", "Test and build on every change")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::RunTests))
            .with_step(StepSpec::new(StepKind::Build).when(Condition::AllTestsPassed))
            .with_step(StepSpec::new(StepKind::Notify))
            .with_rollback(RollbackStrategy::Checkpoint),
        WorkflowTemplate::new("release", "Full release through staging to production")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::AnalyzeCode))
            .with_step(StepSpec::new(StepKind::SecurityScan))
            .with_step(StepSpec::new(StepKind::RunTests))
            .with_step(StepSpec::new(StepKind::Build).when(Condition::AllTestsPassed))
            .with_step(StepSpec::new(StepKind::DeployStaging).when(Condition::previous_step()))
            .with_step(StepSpec::new(StepKind::HealthCheck).when(Condition::previous_step()))
            .with_step(
                StepSpec::new(StepKind::DeployProduction)
                    .when(Condition::ExternalHealthOk {
                        min_duration_seconds: 60,
                    })
                    .when(Condition::SecurityClean)
                    .when(Condition::ManualApproval),
            )
            .with_step(StepSpec::new(StepKind::Notify))
            .with_rollback(RollbackStrategy::Checkpoint),
        WorkflowTemplate::new("hotfix", "Minimal path for urgent fixes")
            .with_step(StepSpec::new(StepKind::RunTests))
            .with_step(StepSpec::new(StepKind::Commit).when(Condition::AllTestsPassed))
            .with_step(
                StepSpec::new(StepKind::DeployProduction).when(Condition::step_succeeded("commit")),
            )
            .with_rollback(RollbackStrategy::Full),
    ]
});

/// Read-mostly store of templates keyed by name.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<BTreeMap<String, Arc<WorkflowTemplate>>>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with the built-in templates.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for template in BUILTIN_TEMPLATES.iter() {
            registry.put(template.clone());
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<WorkflowTemplate>>> {
        self.templates.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<WorkflowTemplate>>> {
        self.templates.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up a template by name.
    pub fn get(&self, name: &str) -> FlowResult<Arc<WorkflowTemplate>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::TemplateNotFound(name.to_string()))
    }

    /// Inserts or replaces a template by name.
    ///
    /// Returns the template that was replaced, if any.
    pub fn put(&self, template: WorkflowTemplate) -> Option<Arc<WorkflowTemplate>> {
        let name = template.name.clone();
        let previous = self.write().insert(name.clone(), Arc::new(template));
        if previous.is_some() {
            info!("Replaced template '{}'", name);
        } else {
            debug!("Registered template '{}'", name);
        }
        previous
    }

    /// Snapshot of all templates, ordered by name.
    pub fn list(&self) -> Vec<Arc<WorkflowTemplate>> {
        self.read().values().cloned().collect()
    }

    /// Upserts every template from a YAML file; returns how many were loaded.
    pub fn import_file(&self, path: impl AsRef<Path>) -> FlowResult<usize> {
        let templates = load_templates(path)?;
        let count = templates.len();
        for template in templates {
            self.put(template);
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
