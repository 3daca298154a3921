//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, storing, and
//! validating workflow templates, plus the per-run state the orchestrator
//! mutates.
//!
//! # Structure
//!
//! - [`model`]: Step kinds, conditions and templates
//! - [`context`]: Facts accumulated while a run progresses
//! - [`state`]: Step statuses, history and run lifecycle
//! - [`parser`]: YAML loading and saving of template files
//! - [`validator`]: Run-start validation rules
//! - [`registry`]: Built-in and user-authored template catalog

pub mod context;
pub mod model;
pub mod parser;
pub mod registry;
pub mod state;
pub mod validator;

pub use context::{ContextPatch, DeploymentRecord, Environment, ExecutionContext, FactValue};
pub use model::{
    CompareOp, Condition, RollbackStrategy, StepCategory, StepKind, StepSpec, WorkflowTemplate,
};
pub use parser::{load_templates, parse_templates, save_templates};
pub use registry::{TemplateRegistry, BUILTIN_TEMPLATES};
pub use state::{RunState, StepHistoryEntry, StepRuntimeState, StepStatus, WorkflowRun};
pub use validator::{validate_template, ValidationError};
