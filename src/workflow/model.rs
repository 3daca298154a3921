//! Workflow Template Model
//!
//! Core data structures describing workflow templates, their steps and the
//! conditions that gate each step.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: quick-check
//! description: Analyze, test and commit
//! rollback: checkpoint
//! steps:
//!   - kind: init
//!
//!   - kind: run_tests
//!     id: test
//!     conditions:
//!       - type: score_at_least
//!         threshold: 70
//!
//!   - kind: commit
//!     conditions:
//!       - type: previous_step_succeeded
//!         step_id: test
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::context::{facts, Environment};

/// Display grouping for step kinds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Setup,
    Analysis,
    Testing,
    Build,
    Review,
    VersionControl,
    Deployment,
    Monitoring,
    Communication,
}

/// The fixed catalog of step kinds.
///
/// Every step in a template is one of these. The embedding application
/// supplies one operation per kind it wants to run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Init,
    AnalyzeCode,
    SecurityScan,
    RunTests,
    Build,
    CodeReview,
    Commit,
    DeployStaging,
    HealthCheck,
    DeployProduction,
    Notify,
}

impl StepKind {
    /// Every kind in catalog order.
    pub const ALL: [StepKind; 11] = [
        StepKind::Init,
        StepKind::AnalyzeCode,
        StepKind::SecurityScan,
        StepKind::RunTests,
        StepKind::Build,
        StepKind::CodeReview,
        StepKind::Commit,
        StepKind::DeployStaging,
        StepKind::HealthCheck,
        StepKind::DeployProduction,
        StepKind::Notify,
    ];

    /// Identifier used in template files and as the default step id.
    pub fn slug(self) -> &'static str {
        match self {
            StepKind::Init => "init",
            StepKind::AnalyzeCode => "analyze_code",
            StepKind::SecurityScan => "security_scan",
            StepKind::RunTests => "run_tests",
            StepKind::Build => "build",
            StepKind::CodeReview => "code_review",
            StepKind::Commit => "commit",
            StepKind::DeployStaging => "deploy_staging",
            StepKind::HealthCheck => "health_check",
            StepKind::DeployProduction => "deploy_production",
            StepKind::Notify => "notify",
        }
    }

    /// Human label for display.
    pub fn label(self) -> &'static str {
        match self {
            StepKind::Init => "Initialize workspace",
            StepKind::AnalyzeCode => "Analyze code quality",
            StepKind::SecurityScan => "Security scan",
            StepKind::RunTests => "Run tests",
            StepKind::Build => "Build",
            StepKind::CodeReview => "Code review",
            StepKind::Commit => "Commit changes",
            StepKind::DeployStaging => "Deploy to staging",
            StepKind::HealthCheck => "Health check",
            StepKind::DeployProduction => "Deploy to production",
            StepKind::Notify => "Notify team",
        }
    }

    /// Expected duration hint in seconds.
    pub fn duration_hint_secs(self) -> u64 {
        match self {
            StepKind::Init => 2,
            StepKind::AnalyzeCode => 30,
            StepKind::SecurityScan => 45,
            StepKind::RunTests => 60,
            StepKind::Build => 90,
            StepKind::CodeReview => 20,
            StepKind::Commit => 3,
            StepKind::DeployStaging => 120,
            StepKind::HealthCheck => 30,
            StepKind::DeployProduction => 180,
            StepKind::Notify => 1,
        }
    }

    pub fn category(self) -> StepCategory {
        match self {
            StepKind::Init => StepCategory::Setup,
            StepKind::AnalyzeCode | StepKind::SecurityScan => StepCategory::Analysis,
            StepKind::RunTests => StepCategory::Testing,
            StepKind::Build => StepCategory::Build,
            StepKind::CodeReview => StepCategory::Review,
            StepKind::Commit => StepCategory::VersionControl,
            StepKind::DeployStaging | StepKind::DeployProduction => StepCategory::Deployment,
            StepKind::HealthCheck => StepCategory::Monitoring,
            StepKind::Notify => StepCategory::Communication,
        }
    }

    /// Facts this kind is declared to write into the execution context.
    pub fn produces(self) -> &'static [&'static str] {
        match self {
            StepKind::AnalyzeCode | StepKind::CodeReview => &[facts::SCORE],
            StepKind::SecurityScan => &[facts::SECURITY_ISSUES],
            StepKind::RunTests => &[facts::TESTS_PASSED],
            StepKind::HealthCheck => &[facts::HEALTH_OK, facts::HEALTHY_SECONDS],
            _ => &[],
        }
    }

    /// True for kinds whose own result facts can turn a call into a failure.
    pub fn reports_failure_from_facts(self) -> bool {
        matches!(self, StepKind::RunTests)
    }

    /// Environment a deployment kind writes a record for.
    pub fn deploys_to(self) -> Option<Environment> {
        match self {
            StepKind::DeployStaging => Some(Environment::Staging),
            StepKind::DeployProduction => Some(Environment::Production),
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.slug() == s.trim())
            .ok_or_else(|| format!("Unknown step kind: '{}'", s))
    }
}

/// Comparison operator for [`Condition::BranchComparison`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

fn default_compared_fact() -> String {
    facts::SCORE.to_string()
}

/// A declarative gate that must hold before a step runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Named step (or the immediately preceding one) must have completed.
    PreviousStepSucceeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },
    /// Accumulated score must reach the threshold.
    ScoreAtLeast { threshold: f64 },
    /// Accumulated security issue count must be zero.
    SecurityClean,
    /// Test run must have reported success.
    AllTestsPassed,
    /// Requires an external approve/skip signal.
    ManualApproval,
    /// Health flag must be set and have held for long enough.
    ExternalHealthOk { min_duration_seconds: u64 },
    /// Compares a numeric fact with a constant.
    BranchComparison {
        #[serde(default = "default_compared_fact")]
        fact: String,
        operator: CompareOp,
        value: f64,
    },
}

impl Condition {
    pub fn previous_step() -> Self {
        Condition::PreviousStepSucceeded { step_id: None }
    }

    pub fn step_succeeded(step_id: impl Into<String>) -> Self {
        Condition::PreviousStepSucceeded {
            step_id: Some(step_id.into()),
        }
    }

    pub fn score_at_least(threshold: f64) -> Self {
        Condition::ScoreAtLeast { threshold }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::PreviousStepSucceeded { step_id: Some(id) } => {
                write!(f, "step '{}' succeeded", id)
            }
            Condition::PreviousStepSucceeded { step_id: None } => {
                write!(f, "previous step succeeded")
            }
            Condition::ScoreAtLeast { threshold } => write!(f, "score >= {}", threshold),
            Condition::SecurityClean => write!(f, "no security issues"),
            Condition::AllTestsPassed => write!(f, "all tests passed"),
            Condition::ManualApproval => write!(f, "manual approval"),
            Condition::ExternalHealthOk {
                min_duration_seconds,
            } => write!(f, "healthy for {}s", min_duration_seconds),
            Condition::BranchComparison {
                fact,
                operator,
                value,
            } => write!(f, "{} {} {}", fact, operator.symbol(), value),
        }
    }
}

/// How far a rollback may reach once a step fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    /// Rollback is never offered.
    #[default]
    None,
    /// Only the most recently completed step may be reverted.
    Step,
    /// Any completed step may be the checkpoint.
    Checkpoint,
    /// Revert everything after the first completed step.
    Full,
}

impl RollbackStrategy {
    pub fn offers_rollback(self) -> bool {
        self != RollbackStrategy::None
    }
}

impl fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RollbackStrategy::None => "none",
            RollbackStrategy::Step => "step",
            RollbackStrategy::Checkpoint => "checkpoint",
            RollbackStrategy::Full => "full",
        };
        f.write_str(name)
    }
}

/// One step of a template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepSpec {
    /// Kind of work this step performs
    pub kind: StepKind,

    /// Explicit identifier; defaults to the kind's slug
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    /// Conditions that must all hold before the step runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl StepSpec {
    /// Creates a step of the given kind with no conditions.
    ///
    /// ```
    /// use flowgate::workflow::{Condition, StepKind, StepSpec};
    ///
    /// let step = StepSpec::new(StepKind::Commit)
    ///     .with_id("commit-main")
    ///     .when(Condition::AllTestsPassed);
    /// assert_eq!(step.id(), "commit-main");
    /// ```
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            id: None,
            conditions: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into().trim().to_string());
        self
    }

    /// Appends a condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(self.kind.slug())
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// An immutable workflow definition.
///
/// Edits go through the consuming builder methods and produce a new value;
/// the registry and the orchestrator only ever hold shared references.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowTemplate {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<StepSpec>,

    #[serde(default)]
    pub rollback: RollbackStrategy,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            steps: Vec::new(),
            rollback: RollbackStrategy::None,
        }
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_rollback(mut self, strategy: RollbackStrategy) -> Self {
        self.rollback = strategy;
        self
    }

    /// Position of the step with the given id.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == id)
    }

    pub fn get_step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id() == id)
    }

    /// Unique step kinds used, in first-use order.
    pub fn kinds(&self) -> Vec<StepKind> {
        let mut kinds = Vec::new();
        for step in &self.steps {
            if !kinds.contains(&step.kind) {
                kinds.push(step.kind);
            }
        }
        kinds
    }

    /// Sum of the duration hints of every step.
    pub fn estimated_duration_secs(&self) -> u64 {
        self.steps.iter().map(|s| s.kind.duration_hint_secs()).sum()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
