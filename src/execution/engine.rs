//! Workflow Orchestrator
//!
//! The driver that walks a run's steps in order:
//! - Condition evaluation before every step
//! - Sequential dispatch to the step executor
//! - Suspension on manual approvals and on external pause requests
//! - Skip, retry and rollback requests from the caller
//! - Ordered event stream for rendering layers
//!
//! Steps never run in parallel within a run. A step that has been
//! dispatched always runs to completion; pausing or abandoning a run takes
//! effect at the next step boundary (abandon, not preempt).

use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use super::condition::{self, StepScope, Verdict};
use super::rollback::{self, CompensatedStep};
use super::step::{OperationTable, StepExecutor};
use crate::error::{FlowError, FlowResult};
use crate::monitoring::{EventBus, RunOutcome, WorkflowEvent};
use crate::workflow::context::ExecutionContext;
use crate::workflow::model::WorkflowTemplate;
use crate::workflow::state::{RunState, StepStatus, WorkflowRun};
use crate::workflow::validator::validate_template;

/// Requests shared between the driver and [`RunControl`] handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ControlSignal {
    paused: bool,
    abandoned: bool,
    /// Step index a skip-forward was requested for
    skip_requested: Option<usize>,
    /// Step index the driver is currently at
    cursor: Option<usize>,
}

/// Cloneable handle for steering a run from other tasks.
///
/// Every request is honored at the driver's next step boundary.
#[derive(Debug, Clone)]
pub struct RunControl {
    signal: Arc<watch::Sender<ControlSignal>>,
}

impl Default for RunControl {
    fn default() -> Self {
        let (tx, _) = watch::channel(ControlSignal::default());
        Self {
            signal: Arc::new(tx),
        }
    }
}

impl RunControl {
    /// Suspends the run before its next step.
    pub fn pause(&self) {
        self.signal.send_modify(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.signal.send_modify(|s| s.paused = false);
    }

    pub fn is_paused(&self) -> bool {
        self.signal.borrow().paused
    }

    /// Skips the step at the cursor without evaluating its conditions.
    ///
    /// Returns the targeted index. If that step is already executing it
    /// finishes normally and the request is dropped.
    pub fn skip_current_step(&self) -> Option<usize> {
        let mut target = None;
        self.signal.send_modify(|s| {
            s.skip_requested = s.cursor;
            target = s.cursor;
        });
        target
    }

    /// Resets the run to idle at the next checkpoint, even while paused.
    pub fn abandon(&self) {
        self.signal.send_modify(|s| s.abandoned = true);
    }

    fn publish_cursor(&self, cursor: Option<usize>) {
        self.signal.send_modify(|s| s.cursor = cursor);
    }

    fn take_skip(&self) -> Option<usize> {
        let mut taken = None;
        self.signal.send_modify(|s| taken = s.skip_requested.take());
        taken
    }

    fn take_abandon(&self) -> bool {
        let mut taken = false;
        self.signal.send_modify(|s| {
            taken = s.abandoned;
            s.abandoned = false;
        });
        taken
    }

    /// Blocks until the pause is lifted or the run is abandoned.
    async fn released(&self) {
        let mut rx = self.signal.subscribe();
        let released = rx.wait_for(|s| !s.paused || s.abandoned).await.map(|_| ());
        if released.is_err() {
            warn!("Run control closed while paused");
        }
    }

    /// Drops pending skip and abandon requests; a pause stays armed.
    fn clear_requests(&self) {
        self.signal.send_modify(|s| {
            s.abandoned = false;
            s.skip_requested = None;
        });
    }

    fn clear(&self) {
        self.signal.send_replace(ControlSignal::default());
    }
}

/// What the driver does after a step boundary checkpoint.
enum Checkpoint {
    Continue,
    Skipped,
    Abandoned,
}

/// Drives one workflow run at a time.
///
/// # Example
///
/// ```rust,no_run
/// use flowgate::execution::{Orchestrator, SimulatedOperations};
/// use flowgate::workflow::{ExecutionContext, TemplateRegistry};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = TemplateRegistry::with_builtins();
///     let mut orchestrator = Orchestrator::new(SimulatedOperations::new().table());
///
///     let state = orchestrator
///         .start_run(registry.get("ci-pipeline")?, ExecutionContext::new())
///         .await?;
///     println!("run finished as {}", state);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Orchestrator {
    executor: StepExecutor,
    run: WorkflowRun,
    control: RunControl,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(operations: OperationTable) -> Self {
        Self {
            executor: StepExecutor::new(operations),
            run: WorkflowRun::default(),
            control: RunControl::default(),
            events: EventBus::new(),
        }
    }

    /// Replaces the operation table used for later steps.
    pub fn with_operations(mut self, operations: OperationTable) -> Self {
        self.executor = StepExecutor::new(operations);
        self
    }

    /// Publishes on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn run(&self) -> &WorkflowRun {
        &self.run
    }

    pub fn state(&self) -> RunState {
        self.run.state()
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Handle for pausing, skipping or abandoning from another task.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Checkpoints a rollback may target right now.
    pub fn rollback_targets(&self) -> Vec<String> {
        self.run.rollback_targets()
    }

    /// Starts a new run and drives it until it completes, fails or waits.
    ///
    /// Any finished or idle run is discarded. A run that is paused or
    /// awaiting approval must be resolved or reset first.
    pub async fn start_run(
        &mut self,
        template: Arc<WorkflowTemplate>,
        context: ExecutionContext,
    ) -> FlowResult<RunState> {
        if self.run.state().is_suspended() {
            return Err(FlowError::RunActive(self.run.state()));
        }

        let executor = &self.executor;
        validate_template(&template, |kind| executor.can_run(kind)).map_err(|source| {
            FlowError::InvalidTemplate {
                template: template.name.clone(),
                source,
            }
        })?;

        self.control.clear_requests();
        self.run = WorkflowRun::new(template, context);

        self.events.publish(WorkflowEvent::RunStarted {
            template: self.run.template.name.clone(),
            steps: self.run.steps.len(),
        });
        self.events.info(format!(
            "Starting workflow '{}' ({} steps)",
            self.run.template.name,
            self.run.steps.len()
        ));

        Ok(self.drive().await)
    }

    pub fn pause(&self) {
        self.events.info("Pause requested");
        self.control.pause();
    }

    pub fn resume(&self) {
        self.events.info("Resume requested");
        self.control.resume();
    }

    pub fn skip_current_step(&self) -> Option<usize> {
        self.control.skip_current_step()
    }

    /// Grants the pending manual approval and continues the run.
    pub async fn approve_waiting_step(&mut self) -> FlowResult<RunState> {
        let index = self.waiting_index()?;

        self.run.steps[index].approved = true;
        self.set_status(index, StepStatus::Pending);
        self.events
            .info(format!("Step '{}' approved", self.run.steps[index].step_id));

        Ok(self.drive().await)
    }

    /// Declines the pending manual approval: the step is skipped.
    pub async fn skip_waiting_step(&mut self) -> FlowResult<RunState> {
        let index = self.waiting_index()?;

        self.set_status(index, StepStatus::Skipped);
        self.events.info(format!(
            "Step '{}' skipped instead of approved",
            self.run.steps[index].step_id
        ));
        self.run.cursor = Some(index + 1);

        Ok(self.drive().await)
    }

    /// Re-runs the failed step, re-evaluating its conditions first.
    pub async fn retry_step(&mut self, step_id: &str) -> FlowResult<RunState> {
        let invalid = |reason: String| FlowError::InvalidRetry {
            step: step_id.to_string(),
            reason,
        };

        if self.run.state() != RunState::Failed {
            return Err(invalid(format!("run is {}", self.run.state())));
        }

        let Some(index) = self.run.template.step_index(step_id) else {
            return Err(invalid("no such step in this run".to_string()));
        };

        let status = self.run.steps[index].status;
        if status != StepStatus::Failed {
            return Err(invalid(format!("step is {}", status)));
        }

        self.run.steps[index].error = None;
        self.set_status(index, StepStatus::Pending);
        self.run.cursor = Some(index);
        self.events.info(format!("Retrying step '{}'", step_id));

        Ok(self.drive().await)
    }

    /// Rolls a failed run back to a checkpoint.
    ///
    /// Rejected requests leave the run untouched.
    pub async fn request_rollback(&mut self, to_step_id: &str) -> FlowResult<Vec<CompensatedStep>> {
        let plan = rollback::plan(&self.run, to_step_id)?;
        self.events.info(format!(
            "Rolling back {} step(s) to '{}'",
            plan.len(),
            to_step_id
        ));

        let compensated = rollback::execute(&mut self.run, &self.executor, plan).await;

        for step in &compensated {
            self.events.publish(WorkflowEvent::StepStatusChanged {
                index: step.index,
                step_id: step.step_id.clone(),
                status: StepStatus::RolledBack,
            });
            if let Some(error) = &step.error {
                self.events.warn(format!(
                    "Compensation for '{}' reported: {}",
                    step.step_id, error
                ));
            }
        }

        Ok(compensated)
    }

    /// Discards the current run. Always yields a fresh idle run.
    pub fn reset(&mut self) {
        self.run = WorkflowRun::default();
        self.control.clear();
        self.events.publish(WorkflowEvent::RunStateChanged {
            state: RunState::Idle,
        });
        self.events.info("Run reset");
    }

    fn waiting_index(&self) -> FlowResult<usize> {
        if self.run.state() != RunState::AwaitingApproval {
            return Err(FlowError::NothingWaiting(self.run.state()));
        }
        self.run
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Waiting)
            .ok_or(FlowError::NothingWaiting(self.run.state()))
    }

    /// The driving loop. Returns the state the run settled in.
    async fn drive(&mut self) -> RunState {
        self.set_state(RunState::Running);

        while let Some(index) = self.run.cursor.filter(|i| *i < self.run.steps.len()) {
            self.control.publish_cursor(Some(index));

            match self.checkpoint(index).await {
                Checkpoint::Continue => {}
                Checkpoint::Skipped => {
                    self.run.cursor = Some(index + 1);
                    continue;
                }
                Checkpoint::Abandoned => return self.abandon_run(),
            }

            let spec = self.run.template.steps[index].clone();
            let verdict = {
                let scope = StepScope {
                    template: &self.run.template,
                    states: &self.run.steps,
                    index,
                };
                condition::evaluate(&spec.conditions, &self.run.context, &scope)
            };

            match verdict {
                Verdict::Proceed => {}
                Verdict::Skip(reason) => {
                    self.set_status(index, StepStatus::Skipped);
                    self.events
                        .info(format!("Skipping step '{}': {}", spec.id(), reason));
                    self.run.cursor = Some(index + 1);
                    continue;
                }
                Verdict::Wait => {
                    if self.settle_requests() {
                        return self.abandon_run();
                    }
                    self.set_status(index, StepStatus::Waiting);
                    self.set_state(RunState::AwaitingApproval);
                    self.events
                        .info(format!("Step '{}' is waiting for approval", spec.id()));
                    return RunState::AwaitingApproval;
                }
            }

            self.set_status(index, StepStatus::Running);
            self.events.info(format!("Running step '{}'", spec.id()));

            let result = self.executor.execute(&spec, &self.run.context).await;

            if result.success {
                let before = self.run.context.clone();
                self.run
                    .mark_completed(index, result.output, result.elapsed, before);
                self.publish_status(index);
                self.run.context.apply(result.patch);
                self.events.info(format!(
                    "Step '{}' completed in {} ms",
                    spec.id(),
                    result.elapsed.as_millis()
                ));
                self.run.cursor = Some(index + 1);
            } else {
                let error = result
                    .error
                    .unwrap_or_else(|| format!("step '{}' failed", spec.id()));
                self.run.mark_failed(index, error.clone(), result.elapsed);
                self.publish_status(index);
                if self.settle_requests() {
                    return self.abandon_run();
                }
                return self.fail(index, error);
            }
        }

        self.run.cursor = None;
        self.control.publish_cursor(None);
        if self.settle_requests() {
            self.events
                .warn("Dropping abandon request: the last step already finished");
        }
        self.set_state(RunState::Completed);
        self.events.info(format!(
            "Workflow '{}' completed: {} completed, {} skipped",
            self.run.template.name,
            self.run.count(StepStatus::Completed),
            self.run.count(StepStatus::Skipped)
        ));
        self.events.publish(WorkflowEvent::RunFinished(RunOutcome::Completed));
        RunState::Completed
    }

    /// Pause, abandon and skip-forward handling at a step boundary.
    async fn checkpoint(&mut self, index: usize) -> Checkpoint {
        if self.control.is_paused() {
            self.set_state(RunState::Paused);
            self.events.info(format!(
                "Run paused before step '{}'",
                self.run.steps[index].step_id
            ));
            self.control.released().await;
        }

        if self.control.take_abandon() {
            return Checkpoint::Abandoned;
        }

        if self.run.state() == RunState::Paused {
            self.set_state(RunState::Running);
            self.events.info("Run resumed");
        }

        match self.control.take_skip() {
            Some(target) if target == index => {
                self.set_status(index, StepStatus::Skipped);
                self.events.info(format!(
                    "Step '{}' skipped on request",
                    self.run.steps[index].step_id
                ));
                Checkpoint::Skipped
            }
            Some(target) => {
                self.drop_skip(target);
                Checkpoint::Continue
            }
            None => Checkpoint::Continue,
        }
    }

    /// Resolves requests that arrived after the last checkpoint.
    ///
    /// A pending skip can no longer reach its step and is dropped. Returns
    /// whether an abandon is pending.
    fn settle_requests(&self) -> bool {
        if let Some(target) = self.control.take_skip() {
            self.drop_skip(target);
        }
        self.control.take_abandon()
    }

    fn drop_skip(&self, target: usize) {
        self.events.warn(format!(
            "Dropping skip request for step #{}: no longer at the cursor",
            target
        ));
    }

    fn abandon_run(&mut self) -> RunState {
        self.reset();
        self.events.warn("Run abandoned");
        RunState::Idle
    }

    fn fail(&mut self, index: usize, error: String) -> RunState {
        let step_id = self.run.steps[index].step_id.clone();
        // Nothing is at the cursor until a retry re-enters the loop
        self.control.publish_cursor(None);
        self.set_state(RunState::Failed);
        self.events
            .error(format!("Step '{}' failed: {}", step_id, error));

        let rollback_targets = self.run.rollback_targets();
        if !rollback_targets.is_empty() {
            self.events.info(format!(
                "Rollback available to: {}",
                rollback_targets.join(", ")
            ));
        }

        self.events
            .publish(WorkflowEvent::RunFinished(RunOutcome::Failed {
                step_id,
                error,
                rollback_targets,
            }));
        RunState::Failed
    }

    fn set_state(&mut self, state: RunState) {
        if self.run.state != state {
            self.run.state = state;
            self.events.publish(WorkflowEvent::RunStateChanged { state });
        }
    }

    fn set_status(&mut self, index: usize, status: StepStatus) {
        self.run.set_status(index, status);
        self.publish_status(index);
    }

    fn publish_status(&self, index: usize) {
        if let Some(step) = self.run.steps.get(index) {
            self.events.publish(WorkflowEvent::StepStatusChanged {
                index,
                step_id: step.step_id.clone(),
                status: step.status,
            });
        }
    }
}
