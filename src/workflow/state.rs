//! Workflow Run State
//!
//! Per-run bookkeeping owned by the orchestrator: step statuses, the
//! completion history used for rollback checkpoints, the cursor and the
//! accumulated execution context.
//!
//! Runs live in memory only. [`WorkflowRun`] serializes for display and
//! reporting but is never reloaded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use super::model::WorkflowTemplate;

/// Status of a single step within a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not reached yet
    Pending,
    /// Dispatched to its operation
    Running,
    /// Operation succeeded
    Completed,
    /// Operation failed
    Failed,
    /// Bypassed by a condition or an explicit skip
    Skipped,
    /// Reverted by a rollback
    RolledBack,
    /// Suspended on a manual approval
    Waiting,
}

impl StepStatus {
    /// Terminal statuses are the only ones allowed behind the cursor.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::RolledBack
        )
    }

    /// Running and waiting steps hold the run's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, StepStatus::Running | StepStatus::Waiting)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::RolledBack => "rolled_back",
            StepStatus::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// Runtime state of one step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepRuntimeState {
    pub step_id: String,
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,

    /// Manual approval was granted for this step
    #[serde(default)]
    pub approved: bool,
}

impl StepRuntimeState {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            elapsed: None,
            approved: false,
        }
    }
}

/// Append-only record written when a step completes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepHistoryEntry {
    pub step_id: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,

    /// Context as it was just before this step's patch was applied
    #[serde(skip)]
    pub(crate) context_before: ExecutionContext,
}

/// Lifecycle state of a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    AwaitingApproval,
    Completed,
    Failed,
}

impl RunState {
    /// Suspended runs must be resumed, resolved or reset before a new start.
    pub fn is_suspended(self) -> bool {
        matches!(self, RunState::Paused | RunState::AwaitingApproval)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::AwaitingApproval => "awaiting_approval",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One execution of a template.
///
/// Mutated only by the orchestrator; everything else reads it.
#[derive(Serialize, Debug, Clone, Default)]
pub struct WorkflowRun {
    pub(crate) template: Arc<WorkflowTemplate>,
    pub(crate) state: RunState,
    pub(crate) cursor: Option<usize>,
    pub(crate) context: ExecutionContext,
    pub(crate) steps: Vec<StepRuntimeState>,
    pub(crate) history: Vec<StepHistoryEntry>,
}

impl WorkflowRun {
    /// Creates a fresh run positioned before the first step.
    pub fn new(template: Arc<WorkflowTemplate>, context: ExecutionContext) -> Self {
        let steps = template
            .steps
            .iter()
            .map(|s| StepRuntimeState::new(s.id()))
            .collect();

        Self {
            template,
            state: RunState::Idle,
            cursor: Some(0),
            context,
            steps,
            history: Vec::new(),
        }
    }

    pub fn template(&self) -> &WorkflowTemplate {
        &self.template
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Index of the step the driver will look at next.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn steps(&self) -> &[StepRuntimeState] {
        &self.steps
    }

    pub fn history(&self) -> &[StepHistoryEntry] {
        &self.history
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRuntimeState> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.step(step_id).map(|s| s.status)
    }

    /// The step suspended on a manual approval, if any.
    pub fn waiting_step(&self) -> Option<&StepRuntimeState> {
        self.steps.iter().find(|s| s.status == StepStatus::Waiting)
    }

    /// The step that failed the run, if any.
    pub fn failed_step(&self) -> Option<&StepRuntimeState> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// History entries whose step is still completed, oldest first.
    pub fn checkpoints(&self) -> impl Iterator<Item = &StepHistoryEntry> {
        self.history
            .iter()
            .filter(|entry| self.status_of(&entry.step_id) == Some(StepStatus::Completed))
    }

    /// Checkpoints a rollback may target; empty unless the run failed.
    pub fn rollback_targets(&self) -> Vec<String> {
        if self.state == RunState::Failed {
            crate::execution::rollback::available_targets(self)
        } else {
            Vec::new()
        }
    }

    /// Number of steps in each status, for summaries.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub(crate) fn set_status(&mut self, index: usize, status: StepStatus) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = status;
        }
    }

    pub(crate) fn mark_completed(
        &mut self,
        index: usize,
        output: String,
        elapsed: Duration,
        context_before: ExecutionContext,
    ) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Completed;
            step.output = Some(output);
            step.error = None;
            step.elapsed = Some(elapsed);

            self.history.push(StepHistoryEntry {
                step_id: step.step_id.clone(),
                status: StepStatus::Completed,
                timestamp: Utc::now(),
                context_before,
            });
        }
    }

    pub(crate) fn mark_failed(&mut self, index: usize, error: String, elapsed: Duration) {
        if let Some(step) = self.steps.get_mut(index) {
            step.status = StepStatus::Failed;
            step.error = Some(error);
            step.elapsed = Some(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{StepKind, StepSpec};

    fn two_step_run() -> WorkflowRun {
        let template = WorkflowTemplate::new("t", "")
            .with_step(StepSpec::new(StepKind::Init))
            .with_step(StepSpec::new(StepKind::Build));
        WorkflowRun::new(Arc::new(template), ExecutionContext::new())
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = two_step_run();
        assert_eq!(run.state(), RunState::Idle);
        assert_eq!(run.cursor(), Some(0));
        assert_eq!(run.count(StepStatus::Pending), 2);
        assert!(run.history().is_empty());
    }

    #[test]
    fn test_default_run_is_empty_idle() {
        let run = WorkflowRun::default();
        assert_eq!(run.state(), RunState::Idle);
        assert!(run.steps().is_empty());
        assert!(run.context().is_empty());
        assert_eq!(run.cursor(), None);
    }

    #[test]
    fn test_mark_completed_appends_history() {
        let mut run = two_step_run();
        run.mark_completed(0, "ok".to_string(), Duration::from_millis(5), ExecutionContext::new());

        assert_eq!(run.status_of("init"), Some(StepStatus::Completed));
        assert_eq!(run.history().len(), 1);
        assert_eq!(run.history()[0].step_id, "init");
        assert_eq!(run.checkpoints().count(), 1);
    }

    #[test]
    fn test_checkpoints_exclude_rolled_back() {
        let mut run = two_step_run();
        run.mark_completed(0, "ok".to_string(), Duration::ZERO, ExecutionContext::new());
        run.mark_completed(1, "ok".to_string(), Duration::ZERO, ExecutionContext::new());
        run.set_status(1, StepStatus::RolledBack);

        let ids: Vec<_> = run.checkpoints().map(|e| e.step_id.as_str()).collect();
        assert_eq!(ids, vec!["init"]);
        assert_eq!(run.history().len(), 2);
    }

    #[test]
    fn test_mark_failed_records_error() {
        let mut run = two_step_run();
        run.mark_failed(1, "boom".to_string(), Duration::ZERO);

        let failed = run.failed_step().unwrap();
        assert_eq!(failed.step_id, "build");
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(run.history().is_empty());
    }

    #[test]
    fn test_status_predicates() {
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Waiting.is_terminal());
        assert!(StepStatus::Waiting.is_active());
        assert!(RunState::AwaitingApproval.is_suspended());
        assert!(RunState::Failed.is_finished());
        assert!(!RunState::Running.is_finished());
    }

    #[test]
    fn test_run_snapshot_serializes() {
        let mut run = two_step_run();
        run.mark_completed(0, "ok".to_string(), Duration::ZERO, ExecutionContext::new());

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["steps"][0]["status"], "completed");
        assert_eq!(json["history"][0]["step_id"], "init");
        assert!(json["history"][0].get("context_before").is_none());
    }
}
