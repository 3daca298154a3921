//! Flowgate - Template-Driven Workflow Orchestration
//!
//! Runs a linear sequence of typed steps (analyze, test, build, deploy, ...)
//! defined by a reusable template. Each step is gated by declarative
//! conditions evaluated against facts accumulated during the run; steps may
//! be skipped, suspended for manual approval, retried, or rolled back to a
//! prior checkpoint after a failure.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Templates, conditions, execution context and run state
//! - [`execution`]: Orchestrator, condition evaluation, step execution and rollback
//! - [`monitoring`]: Event stream and execution timeline for rendering layers
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate::execution::SimulatedOperations;
//! use flowgate::workflow::ExecutionContext;
//! use flowgate::{Orchestrator, TemplateRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Pick a template
//!     let registry = TemplateRegistry::with_builtins();
//!     let template = registry.get("release")?;
//!
//!     // Supply the step operations and drive the run
//!     let mut orchestrator = Orchestrator::new(SimulatedOperations::new().table());
//!     orchestrator.start_run(template, ExecutionContext::new()).await?;
//!
//!     // The release template waits for approval before production
//!     orchestrator.approve_waiting_step().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{FlowError, FlowResult};
pub use execution::engine::{Orchestrator, RunControl};
pub use workflow::model::WorkflowTemplate;
pub use workflow::parser::load_templates;
pub use workflow::registry::TemplateRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Flowgate";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Flowgate");
    }

    #[test]
    fn test_module_exports_registry() {
        let registry = TemplateRegistry::with_builtins();
        assert!(registry.get("code-review").is_ok());
        assert!(matches!(registry.get("missing"), Err(FlowError::TemplateNotFound(_))));
    }

    #[test]
    fn test_module_exports_template() {
        let template = WorkflowTemplate::new("empty", "");
        assert!(template.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
