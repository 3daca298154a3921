//! Individual Step Execution
//!
//! Runs one step's operation through the embedding application's
//! operation table and folds the outcome into a [`StepResult`]:
//! - Start time recording and elapsed time
//! - Collaborator errors and panics converted into failed results
//! - Reported test failures surfaced from the step's own facts
//! - Deployment records added for deployment kinds

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, warn};

use crate::workflow::context::{facts, ContextPatch, DeploymentRecord, ExecutionContext};
use crate::workflow::model::{StepKind, StepSpec};

/// Error type returned by collaborator operations.
pub type OperationError = Box<dyn Error + Send + Sync>;

/// What a collaborator reports back for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub success: bool,
    pub output: String,
    pub patch: ContextPatch,
}

impl StepOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            patch: ContextPatch::new(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            patch: ContextPatch::new(),
        }
    }

    pub fn with_patch(mut self, patch: ContextPatch) -> Self {
        self.patch = patch;
        self
    }
}

/// An operation supplied by the embedding application for one step kind.
///
/// Operations may be slow and may fail in any way; the executor shields
/// the orchestrator from both errors and panics.
#[async_trait]
pub trait StepOperation: Send + Sync {
    /// Performs the step.
    async fn run(
        &self,
        kind: StepKind,
        context: &ExecutionContext,
    ) -> Result<StepOutcome, OperationError>;

    /// Undoes a completed step during rollback.
    async fn compensate(
        &self,
        _kind: StepKind,
        _context: &ExecutionContext,
    ) -> Result<(), OperationError> {
        Ok(())
    }
}

/// Adapts an async closure into a [`StepOperation`].
struct FnOperation<F>(F);

#[async_trait]
impl<F, Fut> StepOperation for FnOperation<F>
where
    F: Fn(StepKind, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutcome, OperationError>> + Send + 'static,
{
    async fn run(
        &self,
        kind: StepKind,
        context: &ExecutionContext,
    ) -> Result<StepOutcome, OperationError> {
        (self.0)(kind, context.clone()).await
    }
}

/// Step kind to operation mapping.
#[derive(Clone, Default)]
pub struct OperationTable {
    operations: HashMap<StepKind, Arc<dyn StepOperation>>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation for a kind, replacing any previous one.
    pub fn register(&mut self, kind: StepKind, operation: Arc<dyn StepOperation>) -> &mut Self {
        self.operations.insert(kind, operation);
        self
    }

    /// Registers an async closure for a kind.
    ///
    /// The closure receives a snapshot of the context.
    pub fn register_fn<F, Fut>(&mut self, kind: StepKind, f: F) -> &mut Self
    where
        F: Fn(StepKind, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutcome, OperationError>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnOperation(f)))
    }

    /// Registers the same operation for every kind in the catalog.
    pub fn register_all(&mut self, operation: Arc<dyn StepOperation>) -> &mut Self {
        for kind in StepKind::ALL {
            self.register(kind, Arc::clone(&operation));
        }
        self
    }

    pub fn get(&self, kind: StepKind) -> Option<&Arc<dyn StepOperation>> {
        self.operations.get(&kind)
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.operations.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.operations.keys().collect();
        kinds.sort();
        f.debug_struct("OperationTable").field("kinds", &kinds).finish()
    }
}

/// Folded result of executing one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub patch: ContextPatch,
    pub elapsed: Duration,
}

impl StepResult {
    fn failed(error: String, output: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
            patch: ContextPatch::new(),
            elapsed,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// Runs steps through an operation table.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    operations: OperationTable,
}

impl StepExecutor {
    pub fn new(operations: OperationTable) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub fn can_run(&self, kind: StepKind) -> bool {
        self.operations.contains(kind)
    }

    /// Executes a step and returns its folded result.
    ///
    /// Never fails: a missing operation, an operation error and a panic all
    /// come back as `success == false` with an error message.
    pub async fn execute(&self, step: &StepSpec, context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step.id();

        let Some(operation) = self.operations.get(step.kind) else {
            error!("No operation registered for kind '{}'", step.kind);
            return StepResult::failed(
                format!("no operation registered for '{}'", step.kind),
                String::new(),
                start.elapsed(),
            );
        };

        let call = AssertUnwindSafe(operation.run(step.kind, context)).catch_unwind();
        let outcome = match call.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Step '{}' operation error: {}", step_id, e);
                return StepResult::failed(e.to_string(), String::new(), start.elapsed());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Step '{}' operation panicked: {}", step_id, message);
                return StepResult::failed(
                    format!("operation panicked: {}", message),
                    String::new(),
                    start.elapsed(),
                );
            }
        };

        let elapsed = start.elapsed();
        let StepOutcome {
            success,
            output,
            mut patch,
        } = outcome;

        if !success {
            let error = if output.trim().is_empty() {
                format!("step '{}' reported failure", step_id)
            } else {
                output.clone()
            };
            return StepResult::failed(error, output, elapsed);
        }

        if step.kind.reports_failure_from_facts() {
            if let Some(false) = patch.facts.get(facts::TESTS_PASSED).and_then(|v| v.as_flag()) {
                warn!("Step '{}' reported failing tests", step_id);
                return StepResult::failed("tests failed".to_string(), output, elapsed);
            }
        }

        for name in patch.facts.keys() {
            if !step.kind.produces().contains(&name.as_str()) {
                debug!("Step '{}' wrote undeclared fact '{}'", step_id, name);
            }
        }

        if let Some(env) = step.kind.deploys_to() {
            patch.deployments.entry(env).or_insert_with(|| DeploymentRecord {
                healthy: true,
                url: String::new(),
            });
        }

        debug!("Step '{}' succeeded in {:?}", step_id, elapsed);
        StepResult {
            success: true,
            output,
            error: None,
            patch,
            elapsed,
        }
    }

    /// Runs the compensating action for a completed step.
    pub async fn compensate(
        &self,
        step: &StepSpec,
        context: &ExecutionContext,
    ) -> Result<(), String> {
        let Some(operation) = self.operations.get(step.kind) else {
            return Ok(());
        };

        match AssertUnwindSafe(operation.compensate(step.kind, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("compensation panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
