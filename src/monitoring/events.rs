//! Run Events
//!
//! Outbound notifications for rendering layers. The orchestrator publishes
//! step status changes, log lines and the final outcome on an [`EventBus`];
//! subscribers receive them in order on their own channel.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::Level;
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::workflow::state::{RunState, StepStatus};

/// Severity of a published log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed {
        step_id: String,
        error: String,
        /// Checkpoints the caller may roll back to; empty when not offered
        rollback_targets: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        template: String,
        steps: usize,
    },
    StepStatusChanged {
        index: usize,
        step_id: String,
        status: StepStatus,
    },
    RunStateChanged {
        state: RunState,
    },
    Log(LogLine),
    RunFinished(RunOutcome),
}

/// Fan-out of workflow events to any number of subscribers.
///
/// Publishing never blocks; subscribers that dropped their receiver are
/// pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<WorkflowEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> UnboundedReceiver<WorkflowEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn publish(&self, event: WorkflowEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Logs through the `log` facade and publishes the same line.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        log::log!(Level::from(level), "{}", message);
        self.publish(WorkflowEvent::Log(LogLine {
            level,
            message,
            timestamp: Utc::now(),
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_to_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(WorkflowEvent::RunStateChanged {
            state: RunState::Running,
        });

        for rx in [&mut first, &mut second] {
            assert_eq!(
                rx.try_recv().unwrap(),
                WorkflowEvent::RunStateChanged {
                    state: RunState::Running
                }
            );
        }
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.info("hello");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_log_line_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.warn("careful");

        match rx.try_recv().unwrap() {
            WorkflowEvent::Log(line) => {
                assert_eq!(line.level, LogLevel::Warn);
                assert_eq!(line.message, "careful");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = WorkflowEvent::RunFinished(RunOutcome::Failed {
            step_id: "build".to_string(),
            error: "boom".to_string(),
            rollback_targets: vec!["init".to_string()],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "run_finished");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["rollback_targets"][0], "init");
    }
}
