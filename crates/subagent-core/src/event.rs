//! Observability events recorded per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EventKind;

/// One entry of a run's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    /// When the event occurred.
    pub time: DateTime<Utc>,
    /// Severity.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Human-readable message.
    pub message: String,
    /// Event-specific structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ObservabilityEvent {
    /// Create a new event stamped with the current time.
    pub fn new(kind: EventKind, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            time: Utc::now(),
            kind,
            message: message.into(),
            data,
        }
    }

    /// Create an info event.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventKind::Info, message, None)
    }

    /// Create a warning event.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventKind::Warning, message, None)
    }

    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message, None)
    }

    /// Builder method to attach data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
