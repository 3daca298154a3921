//! Workflow Execution Module
//!
//! Provides the orchestrator that drives a run step by step, together with
//! the pieces it sequences.
//!
//! # Architecture
//!
//! - [`engine`]: Orchestrator driving loop and run control handle
//! - [`condition`]: Condition evaluation for a single step
//! - [`step`]: Individual step execution through the operation table
//! - [`rollback`]: Checkpoint rollback with compensating actions
//! - [`batch`]: Bounded-window execution of independent jobs
//! - [`simulate`]: Deterministic operation table for demos and tests

pub mod batch;
pub mod condition;
pub mod engine;
pub mod rollback;
pub mod simulate;
pub mod step;

pub use batch::{run_in_batches, DEFAULT_WINDOW};
pub use condition::{evaluate, Verdict};
pub use engine::{Orchestrator, RunControl};
pub use rollback::CompensatedStep;
pub use simulate::SimulatedOperations;
pub use step::{
    OperationError, OperationTable, StepExecutor, StepOperation, StepOutcome, StepResult,
};
