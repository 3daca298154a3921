//! Simulated Operations
//!
//! A deterministic stand-in for the embedding application's integrations
//! (analysis service, test runner, build, deploy). The CLI runs templates
//! against it, and tests use it wherever a realistic table is handy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::step::{OperationError, OperationTable, StepOperation, StepOutcome};
use crate::workflow::context::{ContextPatch, DeploymentRecord, Environment, ExecutionContext};
use crate::workflow::model::StepKind;

/// Tunable simulated results for every step kind.
#[derive(Debug, Clone)]
pub struct SimulatedOperations {
    /// Score reported by analysis and review steps
    pub score: f64,
    /// Issue count reported by the security scan
    pub security_issues: u64,
    /// Whether the test step reports a passing suite
    pub tests_pass: bool,
    /// Seconds the health probe reports as healthy
    pub healthy_seconds: u64,
    /// Kinds whose operation returns an error
    pub failing: HashSet<StepKind>,
    /// Artificial latency per step
    pub delay: Duration,
    calls: Arc<Mutex<Vec<StepKind>>>,
    compensations: Arc<Mutex<Vec<StepKind>>>,
}

impl Default for SimulatedOperations {
    fn default() -> Self {
        Self {
            score: 85.0,
            security_issues: 0,
            tests_pass: true,
            healthy_seconds: 120,
            failing: HashSet::new(),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            compensations: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SimulatedOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_security_issues(mut self, count: u64) -> Self {
        self.security_issues = count;
        self
    }

    pub fn with_tests_passing(mut self, pass: bool) -> Self {
        self.tests_pass = pass;
        self
    }

    pub fn with_healthy_seconds(mut self, seconds: u64) -> Self {
        self.healthy_seconds = seconds;
        self
    }

    pub fn failing(mut self, kind: StepKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Kinds invoked so far, in call order.
    pub fn calls(&self) -> Vec<StepKind> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Kinds compensated so far, in call order.
    pub fn compensations(&self) -> Vec<StepKind> {
        self.compensations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Operation table with this simulation registered for every kind.
    pub fn table(&self) -> OperationTable {
        let mut table = OperationTable::new();
        table.register_all(Arc::new(self.clone()));
        table
    }

    fn outcome(&self, kind: StepKind) -> StepOutcome {
        match kind {
            StepKind::Init => StepOutcome::success("Workspace initialized"),
            StepKind::AnalyzeCode => StepOutcome::success(format!("Quality score: {}", self.score))
                .with_patch(ContextPatch::new().score(self.score)),
            StepKind::SecurityScan => StepOutcome::success(format!(
                "{} security issue(s) found",
                self.security_issues
            ))
            .with_patch(ContextPatch::new().security_issues(self.security_issues)),
            StepKind::RunTests => {
                let summary = if self.tests_pass {
                    "All tests passed"
                } else {
                    "Test failures detected"
                };
                StepOutcome::success(summary)
                    .with_patch(ContextPatch::new().tests_passed(self.tests_pass))
            }
            StepKind::Build => StepOutcome::success("Build succeeded"),
            StepKind::CodeReview => StepOutcome::success("Review approved")
                .with_patch(ContextPatch::new().score(self.score)),
            StepKind::Commit => StepOutcome::success("Changes committed"),
            StepKind::DeployStaging => deployed(Environment::Staging),
            StepKind::DeployProduction => deployed(Environment::Production),
            StepKind::HealthCheck => StepOutcome::success(format!(
                "Healthy for {}s",
                self.healthy_seconds
            ))
            .with_patch(ContextPatch::new().health(true, self.healthy_seconds)),
            StepKind::Notify => StepOutcome::success("Team notified"),
        }
    }
}

fn deployed(env: Environment) -> StepOutcome {
    let record = DeploymentRecord {
        healthy: true,
        url: format!("https://{}.example.com", env),
    };
    StepOutcome::success(format!("Deployed to {}", env))
        .with_patch(ContextPatch::new().deployment(env, record))
}

#[async_trait]
impl StepOperation for SimulatedOperations {
    async fn run(
        &self,
        kind: StepKind,
        _context: &ExecutionContext,
    ) -> Result<StepOutcome, OperationError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(kind);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(&kind) {
            return Err(format!("simulated failure in {}", kind.label()).into());
        }

        debug!("Simulated {}", kind);
        Ok(self.outcome(kind))
    }

    async fn compensate(
        &self,
        kind: StepKind,
        _context: &ExecutionContext,
    ) -> Result<(), OperationError> {
        self.compensations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_outcomes() {
        let sim = SimulatedOperations::new();
        let context = ExecutionContext::new();

        let analysis = sim.run(StepKind::AnalyzeCode, &context).await.unwrap();
        assert_eq!(analysis.patch, ContextPatch::new().score(85.0));

        let tests = sim.run(StepKind::RunTests, &context).await.unwrap();
        assert_eq!(tests.patch, ContextPatch::new().tests_passed(true));

        assert_eq!(sim.calls(), vec![StepKind::AnalyzeCode, StepKind::RunTests]);
    }

    #[tokio::test]
    async fn test_deploy_outcomes_target_their_environment() {
        let sim = SimulatedOperations::new();
        let context = ExecutionContext::new();

        let production = sim.run(StepKind::DeployProduction, &context).await.unwrap();
        let expected = DeploymentRecord {
            healthy: true,
            url: "https://production.example.com".to_string(),
        };
        assert_eq!(
            production.patch,
            ContextPatch::new().deployment(Environment::Production, expected)
        );

        let staging = sim.run(StepKind::DeployStaging, &context).await.unwrap();
        assert_eq!(staging.output, "Deployed to staging");
    }

    #[tokio::test]
    async fn test_failing_kind() {
        let sim = SimulatedOperations::new().failing(StepKind::Build);
        let result = sim.run(StepKind::Build, &ExecutionContext::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let sim = SimulatedOperations::new();
        let table = sim.table();

        let op = table.get(StepKind::Notify).unwrap();
        op.run(StepKind::Notify, &ExecutionContext::new()).await.unwrap();
        op.compensate(StepKind::Notify, &ExecutionContext::new()).await.unwrap();

        assert_eq!(sim.calls(), vec![StepKind::Notify]);
        assert_eq!(sim.compensations(), vec![StepKind::Notify]);
    }
}
