//! Coordinator error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a Coordinator to listeners and callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Coordinator stopped")]
    Stopped,
}

impl CoordError {
    /// Wrap a fetch error, keeping the full context chain
    pub fn fetch_failed(err: eyre::Report) -> Self {
        CoordError::FetchFailed(format!("{:#}", err))
    }

    /// Check if this error came from the fetch itself (failure or deadline)
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, CoordError::FetchFailed(_) | CoordError::Timeout(_))
    }

    /// Check if the coordinator has been torn down
    pub fn is_stopped(&self) -> bool {
        matches!(self, CoordError::Stopped)
    }
}
