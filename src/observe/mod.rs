//! Optional observability sink for runtime events.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::ThreadId;

/// Named runtime events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuntimeEventKind {
    TurnStarted,
    TurnEnded,
    TerminationDetected,
    ProviderError,
    ToolError,
}

/// An event with free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeEvent {
    pub kind: RuntimeEventKind,
    pub thread_id: ThreadId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RuntimeEvent {
    pub fn new(kind: RuntimeEventKind, thread_id: ThreadId, metadata: serde_json::Value) -> Self {
        Self {
            kind,
            thread_id,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Receives runtime events. Must not block; failures are the sink's problem.
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, event: RuntimeEvent);
}

/// Forward an event to an optional sink.
pub(crate) fn emit(sink: &Option<Arc<dyn ObservabilitySink>>, event: RuntimeEvent) {
    if let Some(sink) = sink {
        sink.record(event);
    }
}

/// Sink that writes events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, event: RuntimeEvent) {
        match event.kind {
            RuntimeEventKind::ProviderError | RuntimeEventKind::ToolError => tracing::warn!(
                event = %event.kind,
                thread_id = %event.thread_id,
                metadata = %event.metadata,
                "runtime event"
            ),
            _ => tracing::info!(
                event = %event.kind,
                thread_id = %event.thread_id,
                metadata = %event.metadata,
                "runtime event"
            ),
        }
    }
}

/// Sink that keeps every event in memory, for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<RuntimeEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl ObservabilitySink for RecordingSink {
    fn record(&self, event: RuntimeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
