//! Message and state types for the Coordinator

use std::fmt;
use std::sync::Weak;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::error::CoordError;
use super::listener::{Listener, Subscription};

/// Coordinator lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No fetch in flight; the last refresh (if any) succeeded
    #[default]
    Idle,
    /// A fetch is in flight
    Refreshing,
    /// The last refresh failed; the next tick or request is still attempted
    Failed,
    /// Torn down; terminal
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Refreshing => "refreshing",
            Status::Failed => "failed",
            Status::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Read-only view of coordinator state at one instant
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    /// Last successfully fetched value
    pub value: Option<T>,
    /// When the cached value was last updated
    pub last_update: Option<DateTime<Utc>>,
    pub status: Status,
    /// Error of the most recent failed refresh, cleared on success
    pub last_error: Option<CoordError>,
    /// Whether the most recent refresh succeeded
    pub last_update_success: bool,
    /// Completed refreshes (success or failure)
    pub refresh_count: u64,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_update: None,
            status: Status::Idle,
            last_error: None,
            last_update_success: false,
            refresh_count: 0,
        }
    }
}

/// Result delivered to callers awaiting a refresh
pub type RefreshResult<T> = Result<T, CoordError>;

/// Internal requests to the Coordinator task
pub enum CoordRequest<T> {
    /// Register a listener (held weakly)
    Register {
        listener: Weak<dyn Listener<T>>,
        reply_tx: oneshot::Sender<Subscription>,
    },

    /// Remove a listener; replies once the removal is in effect
    Unregister {
        subscription: Subscription,
        reply_tx: oneshot::Sender<()>,
    },

    /// Start a fetch or join the one in flight
    Refresh { reply_tx: oneshot::Sender<RefreshResult<T>> },

    /// Push an out-of-band value
    SetUpdated { value: T, reply_tx: oneshot::Sender<()> },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Tear down the coordinator
    Shutdown { reply_tx: oneshot::Sender<()> },
}

impl<T> fmt::Debug for CoordRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordRequest::Register { .. } => write!(f, "Register"),
            CoordRequest::Unregister { subscription, .. } => write!(f, "Unregister({})", subscription.id()),
            CoordRequest::Refresh { .. } => write!(f, "Refresh"),
            CoordRequest::SetUpdated { .. } => write!(f, "SetUpdated"),
            CoordRequest::GetMetrics { .. } => write!(f, "GetMetrics"),
            CoordRequest::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    pub registered_listeners: usize,
    pub refresh_requests: u64,
    pub requests_joined: u64,
    pub fetches_started: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub notifications_sent: u64,
    pub listener_panics: u64,
}
