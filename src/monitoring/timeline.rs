//! Execution Timeline
//!
//! Builds a step timeline from the orchestrator's event stream for end of
//! run reports: a per-step status summary and an ASCII chart of when each
//! step ran.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::events::WorkflowEvent;
use crate::workflow::state::StepStatus;

/// Step transitions the timeline keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
    Skipped,
    Waiting,
    RolledBack,
}

impl EventType {
    fn from_status(status: StepStatus) -> Option<Self> {
        match status {
            StepStatus::Running => Some(EventType::Started),
            StepStatus::Completed => Some(EventType::Completed),
            StepStatus::Failed => Some(EventType::Failed),
            StepStatus::Skipped => Some(EventType::Skipped),
            StepStatus::Waiting => Some(EventType::Waiting),
            StepStatus::RolledBack => Some(EventType::RolledBack),
            StepStatus::Pending => None,
        }
    }

    fn ends_execution(self) -> bool {
        matches!(self, EventType::Completed | EventType::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Step timeline of one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    order: Vec<String>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            order: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&mut self, step_id: impl Into<String>, event_type: EventType) {
        let step_id = step_id.into();
        if !self.order.contains(&step_id) {
            self.order.push(step_id.clone());
        }
        self.events.push(TimelineEvent {
            step_id,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Folds an orchestrator event into the timeline; other events are ignored.
    pub fn record(&mut self, event: &WorkflowEvent) {
        if let WorkflowEvent::StepStatusChanged { step_id, status, .. } = event {
            if let Some(event_type) = EventType::from_status(*status) {
                self.add_event(step_id.clone(), event_type);
            }
        }
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Latest recorded transition of a step.
    pub fn last_event(&self, step_id: &str) -> Option<EventType> {
        self.events
            .iter()
            .rev()
            .find(|e| e.step_id == step_id)
            .map(|e| e.event_type)
    }

    /// Time between a step's start and its completion or failure.
    ///
    /// A retried step reports its latest attempt.
    pub fn get_durations(&self) -> HashMap<String, Duration> {
        self.last_attempts()
            .into_iter()
            .map(|(step_id, (_, duration))| (step_id, duration))
            .collect()
    }

    /// Start and length of each step's latest finished attempt.
    fn last_attempts(&self) -> HashMap<String, (Instant, Duration)> {
        let mut starts: HashMap<&str, Instant> = HashMap::new();
        let mut attempts = HashMap::new();

        for event in &self.events {
            if event.event_type == EventType::Started {
                starts.insert(&event.step_id, event.timestamp);
            } else if event.event_type.ends_execution() {
                if let Some(start) = starts.get(event.step_id.as_str()) {
                    let duration = event.timestamp.duration_since(*start);
                    attempts.insert(event.step_id.clone(), (*start, duration));
                }
            }
        }

        attempts
    }

    /// One line per step with its final transition.
    pub fn summary(&self) -> String {
        let durations = self.get_durations();
        let mut output = String::from("Step summary:\n");

        for step_id in &self.order {
            let status = self
                .last_event(step_id)
                .map(|e| format!("{:?}", e))
                .unwrap_or_default();
            match durations.get(step_id) {
                Some(duration) => output.push_str(&format!(
                    "  {:18} {:10} {} ms\n",
                    truncate(step_id, 18),
                    status,
                    duration.as_millis()
                )),
                None => output.push_str(&format!("  {:18} {}\n", truncate(step_id, 18), status)),
            }
        }

        output
    }

    /// Generates an ASCII chart of when each executed step ran.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;
        let attempts = self.last_attempts();

        for step_id in &self.order {
            let Some((start, duration)) = attempts.get(step_id) else {
                continue;
            };

            let offset = start.duration_since(self.start_time).as_millis();
            let start_pos = (offset as f64 * scale) as usize;
            let width = (duration.as_millis() as f64 * scale).max(1.0) as usize;

            output.push_str(&format!(
                "{:18} |{}{}| ({} ms)\n",
                truncate(step_id, 18),
                " ".repeat(start_pos),
                "#".repeat(width),
                duration.as_millis()
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a string to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
