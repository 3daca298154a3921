//! Execution Context
//!
//! The fact store accumulated during one workflow run. Steps write facts
//! through a [`ContextPatch`]; conditions read them through the typed
//! accessors on [`ExecutionContext`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known fact names.
pub mod facts {
    /// Accumulated quality score (number).
    pub const SCORE: &str = "score";
    /// Number of open security issues (count).
    pub const SECURITY_ISSUES: &str = "security_issues";
    /// Whether the test suite passed (flag).
    pub const TESTS_PASSED: &str = "tests_passed";
    /// Whether the external health probe reports healthy (flag).
    pub const HEALTH_OK: &str = "health_ok";
    /// How long the probe has reported healthy, in seconds (count).
    pub const HEALTHY_SECONDS: &str = "healthy_seconds";
}

/// A typed fact value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FactValue {
    Flag(bool),
    Count(u64),
    Number(f64),
    Text(String),
}

impl FactValue {
    /// Numeric view; counts widen to numbers, flags and text have none.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FactValue::Number(n) => Some(*n),
            FactValue::Count(c) => Some(*c as f64),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            FactValue::Count(c) => Some(*c),
            FactValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FactValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Flag(value)
    }
}

impl From<u64> for FactValue {
    fn from(value: u64) -> Self {
        FactValue::Count(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        FactValue::Number(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Text(value.to_string())
    }
}

/// Deployment target environments.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Staging,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Staging => f.write_str("staging"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Outcome of a deployment step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeploymentRecord {
    pub healthy: bool,
    pub url: String,
}

/// Facts and deployment records produced by one step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ContextPatch {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facts: BTreeMap<String, FactValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployments: BTreeMap<Environment, DeploymentRecord>,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an arbitrary fact.
    pub fn fact(mut self, name: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.facts.insert(name.into(), value.into());
        self
    }

    pub fn score(self, score: f64) -> Self {
        self.fact(facts::SCORE, score)
    }

    pub fn security_issues(self, count: u64) -> Self {
        self.fact(facts::SECURITY_ISSUES, count)
    }

    pub fn tests_passed(self, passed: bool) -> Self {
        self.fact(facts::TESTS_PASSED, passed)
    }

    pub fn health(self, ok: bool, healthy_seconds: u64) -> Self {
        self.fact(facts::HEALTH_OK, ok)
            .fact(facts::HEALTHY_SECONDS, healthy_seconds)
    }

    pub fn deployment(mut self, env: Environment, record: DeploymentRecord) -> Self {
        self.deployments.insert(env, record);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.deployments.is_empty()
    }
}

/// Mutable fact store scoped to one run.
///
/// Only the orchestrator writes to it, by applying a step's patch after
/// the step completes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExecutionContext {
    #[serde(default)]
    facts: BTreeMap<String, FactValue>,

    #[serde(default)]
    deployments: BTreeMap<Environment, DeploymentRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from an initial patch.
    pub fn from_patch(patch: ContextPatch) -> Self {
        let mut context = Self::new();
        context.apply(patch);
        context
    }

    /// Merges a patch, overwriting facts and records with the same key.
    pub fn apply(&mut self, patch: ContextPatch) {
        self.facts.extend(patch.facts);
        self.deployments.extend(patch.deployments);
    }

    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.facts.get(name)
    }

    /// Numeric fact, missing or non-numeric reads as 0.
    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(FactValue::as_number).unwrap_or(0.0)
    }

    /// Boolean fact, missing reads as false.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(FactValue::as_flag).unwrap_or(false)
    }

    pub fn score(&self) -> f64 {
        self.number(facts::SCORE)
    }

    /// Security issue count, `None` when no scan has reported yet.
    pub fn security_issues(&self) -> Option<u64> {
        self.get(facts::SECURITY_ISSUES).and_then(FactValue::as_count)
    }

    pub fn tests_passed(&self) -> bool {
        self.flag(facts::TESTS_PASSED)
    }

    pub fn health_ok(&self) -> bool {
        self.flag(facts::HEALTH_OK)
    }

    pub fn healthy_seconds(&self) -> u64 {
        self.get(facts::HEALTHY_SECONDS)
            .and_then(FactValue::as_count)
            .unwrap_or(0)
    }

    pub fn deployment(&self, env: Environment) -> Option<&DeploymentRecord> {
        self.deployments.get(&env)
    }

    pub fn facts(&self) -> &BTreeMap<String, FactValue> {
        &self.facts
    }

    pub fn deployments(&self) -> &BTreeMap<Environment, DeploymentRecord> {
        &self.deployments
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.deployments.is_empty()
    }
}
