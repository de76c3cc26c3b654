//! Run lifecycle events.
//!
//! The executor reports progress as [`RunEvent`] values handed to an
//! [`EventSink`]. Every event also serializes to a dotted type string plus a
//! JSON payload, which is what the logging sink writes.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunEvent {
    /// The executor started (or resumed) a run.
    RunStarted {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Total number of steps in the plan.
        steps: usize,
        /// Steps already done from earlier invocations.
        already_done: usize,
    },
    /// A step is about to run.
    StepStarted {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Step name.
        step: String,
        /// Zero-based position in the plan.
        index: usize,
    },
    /// A step finished successfully and its marker was written.
    StepCompleted {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Step name.
        step: String,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// A step was skipped because its marker already exists.
    StepSkipped {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Step name.
        step: String,
    },
    /// A step failed; the run is marked WRONG.
    StepFailed {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Step name.
        step: String,
        /// Process exit code, if the failure came from one.
        exit_code: Option<i32>,
        /// Error message.
        message: String,
    },
    /// Every step is done and the OK marker was written.
    RunCompleted {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// Steps executed by this invocation.
        executed: usize,
        /// Steps skipped by this invocation.
        skipped: usize,
    },
    /// The run directory already carries a terminal marker; nothing was done.
    RunNoop {
        /// Identifies this executor invocation.
        invocation_id: Uuid,
        /// The terminal marker found ("OK" or "WRONG").
        marker: String,
    },
}

impl RunEvent {
    /// Returns the dotted event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StepStarted { .. } => "step.started",
            Self::StepCompleted { .. } => "step.completed",
            Self::StepSkipped { .. } => "step.skipped",
            Self::StepFailed { .. } => "step.failed",
            Self::RunCompleted { .. } => "run.completed",
            Self::RunNoop { .. } => "run.noop",
        }
    }

    /// Returns the event payload as JSON.
    #[must_use]
    pub fn data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Returns the step the event is about, if any.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepSkipped { step, .. }
            | Self::StepFailed { step, .. } => Some(step),
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunNoop { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_payload() {
        let id = Uuid::new_v4();
        let event = RunEvent::StepFailed {
            invocation_id: id,
            step: "gymno_01.align".to_string(),
            exit_code: Some(2),
            message: "boom".to_string(),
        };

        assert_eq!(event.event_type(), "step.failed");
        assert_eq!(event.step(), Some("gymno_01.align"));

        let data = event.data();
        assert_eq!(data["step"], "gymno_01.align");
        assert_eq!(data["exit_code"], 2);
        assert_eq!(data["invocation_id"], id.to_string());
    }

    #[test]
    fn test_run_events_have_no_step() {
        let event = RunEvent::RunNoop {
            invocation_id: Uuid::new_v4(),
            marker: "OK".to_string(),
        };
        assert_eq!(event.event_type(), "run.noop");
        assert!(event.step().is_none());
    }
}
