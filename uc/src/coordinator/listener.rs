//! Listener trait and notification payloads

use chrono::{DateTime, Utc};

use super::error::CoordError;

/// Notification delivered to listeners once per completed refresh
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    /// A refresh produced a new value (or one was pushed with `set_updated`)
    Refreshed { value: T, at: DateTime<Utc> },

    /// A refresh failed; the cached value is unchanged
    Failed { error: CoordError, at: DateTime<Utc> },
}

impl<T> Update<T> {
    /// The value carried by a successful update
    pub fn value(&self) -> Option<&T> {
        match self {
            Update::Refreshed { value, .. } => Some(value),
            Update::Failed { .. } => None,
        }
    }

    /// The error carried by a failed update
    pub fn error(&self) -> Option<&CoordError> {
        match self {
            Update::Refreshed { .. } => None,
            Update::Failed { error, .. } => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Update::Refreshed { .. })
    }

    /// When the update was recorded
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Update::Refreshed { at, .. } | Update::Failed { at, .. } => *at,
        }
    }
}

/// Receiver of coordinator updates
///
/// Callbacks run synchronously on the coordinator task after state has been
/// updated, so they must not block. A panicking listener is logged and
/// skipped; the remaining listeners are still notified.
pub trait Listener<T>: Send + Sync {
    fn on_update(&self, update: &Update<T>);
}

impl<T, F> Listener<T> for F
where
    F: Fn(&Update<T>) + Send + Sync,
{
    fn on_update(&self, update: &Update<T>) {
        (self)(update)
    }
}

/// Registration handle returned by `register`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(pub(crate) u64);

impl Subscription {
    pub fn id(&self) -> u64 {
        self.0
    }
}
