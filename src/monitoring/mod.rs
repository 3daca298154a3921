//! Run Monitoring Module
//!
//! Outbound surface of the orchestrator for rendering layers.
//!
//! # Components
//!
//! - [`EventBus`]: ordered fan-out of step status changes, log lines and outcomes
//! - [`ExecutionTimeline`]: step timing built from the event stream

pub mod events;
pub mod timeline;

pub use events::{EventBus, LogLevel, LogLine, RunOutcome, WorkflowEvent};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
