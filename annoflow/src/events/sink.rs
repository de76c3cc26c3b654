//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use super::RunEvent;

/// Receives run events.
///
/// Sinks must not fail: a sink that cannot deliver an event logs and drops
/// it, so observability never changes the outcome of a run.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: &RunEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: &RunEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &RunEvent) {}

    fn try_emit(&self, _event: &RunEvent) {}
}

/// Writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &RunEvent) {
        let event_type = event.event_type();
        let data = event.data();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &RunEvent) {
        self.log_event(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(RunEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the names of the steps that produced events of `event_type`.
    #[must_use]
    pub fn steps_with(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .filter_map(|e| e.step().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}
