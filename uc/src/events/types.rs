//! Event types for coordinator activity streaming
//!
//! These events describe everything observable about a coordinator:
//! - Refresh lifecycle (started, succeeded, failed)
//! - Out-of-band value pushes
//! - Teardown

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core event enum - the vocabulary of coordinator activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoordEvent {
    /// A fetch has started
    RefreshStarted {
        coordinator: String,
        resource_id: String,
        refresh_id: String,
        /// "timer", "request" or "start"
        trigger: String,
    },
    /// A fetch completed and the cache was updated
    RefreshSucceeded {
        coordinator: String,
        resource_id: String,
        refresh_id: String,
        duration_ms: u64,
        listeners_notified: usize,
    },
    /// A fetch failed; the cache is unchanged
    RefreshFailed {
        coordinator: String,
        resource_id: String,
        refresh_id: String,
        error: String,
        duration_ms: u64,
        listeners_notified: usize,
    },
    /// A value was pushed with `set_updated`
    ValueSet {
        coordinator: String,
        resource_id: String,
        listeners_notified: usize,
    },
    /// The coordinator was torn down
    Stopped { coordinator: String, resource_id: String },
}

impl CoordEvent {
    /// Name of the coordinator that emitted this event
    pub fn coordinator(&self) -> &str {
        match self {
            CoordEvent::RefreshStarted { coordinator, .. }
            | CoordEvent::RefreshSucceeded { coordinator, .. }
            | CoordEvent::RefreshFailed { coordinator, .. }
            | CoordEvent::ValueSet { coordinator, .. }
            | CoordEvent::Stopped { coordinator, .. } => coordinator,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            CoordEvent::RefreshStarted { resource_id, .. }
            | CoordEvent::RefreshSucceeded { resource_id, .. }
            | CoordEvent::RefreshFailed { resource_id, .. }
            | CoordEvent::ValueSet { resource_id, .. }
            | CoordEvent::Stopped { resource_id, .. } => resource_id,
        }
    }

    /// Refresh this event belongs to, if any
    pub fn refresh_id(&self) -> Option<&str> {
        match self {
            CoordEvent::RefreshStarted { refresh_id, .. }
            | CoordEvent::RefreshSucceeded { refresh_id, .. }
            | CoordEvent::RefreshFailed { refresh_id, .. } => Some(refresh_id),
            CoordEvent::ValueSet { .. } | CoordEvent::Stopped { .. } => None,
        }
    }

    /// Get the event type name for logging/filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordEvent::RefreshStarted { .. } => "RefreshStarted",
            CoordEvent::RefreshSucceeded { .. } => "RefreshSucceeded",
            CoordEvent::RefreshFailed { .. } => "RefreshFailed",
            CoordEvent::ValueSet { .. } => "ValueSet",
            CoordEvent::Stopped { .. } => "Stopped",
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: CoordEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: CoordEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
