//! Event sink port - receives per-account sync outcomes

use std::sync::Mutex;

use crate::domain::LogEvent;

/// Receiver of privacy-safe sync events
///
/// Recording is best effort: a sink that cannot store an event logs the
/// failure itself and never fails the sync.
pub trait EventSink: Send + Sync {
    fn record(&self, event: LogEvent);
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&self, _event: LogEvent) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: LogEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
