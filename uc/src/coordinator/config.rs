//! Coordinator configuration

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest accepted refresh interval
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Coordinator configuration
///
/// The resource identifier is attached here rather than baked into the
/// fetcher, so one fetcher type can serve many resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Human-readable coordinator name
    pub name: String,

    /// Opaque identifier of the polled resource (e.g. a device ID)
    #[serde(rename = "resource-id")]
    pub resource_id: String,

    /// Periodic refresh interval in seconds (0 disables the timer)
    #[serde(rename = "refresh-interval-secs", default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Periodic refresh interval in milliseconds; overrides the seconds value when set
    #[serde(rename = "refresh-interval-ms", default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,

    /// Optional deadline for a single fetch in milliseconds
    #[serde(rename = "fetch-timeout-ms", default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,

    /// Fetch once immediately after start, before the first tick
    #[serde(rename = "refresh-on-start", default)]
    pub refresh_on_start: bool,

    /// Channel buffer size for coordinator requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Capacity of the lifecycle event broadcast channel
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_refresh_interval_secs() -> u64 {
    debug!("default_refresh_interval_secs: called");
    30
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    100
}

fn default_event_capacity() -> usize {
    debug!("default_event_capacity: called");
    1000
}

impl CoordinatorConfig {
    /// Create a config with default tuning for the given resource
    pub fn new(name: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let name = name.into();
        let resource_id = resource_id.into();
        debug!(%name, %resource_id, "CoordinatorConfig::new: called");
        Self {
            name,
            resource_id,
            refresh_interval_secs: default_refresh_interval_secs(),
            refresh_interval_ms: None,
            fetch_timeout_ms: None,
            refresh_on_start: false,
            channel_buffer: default_channel_buffer(),
            event_capacity: default_event_capacity(),
        }
    }

    /// Set the refresh interval (millisecond precision; zero disables periodic refresh)
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_secs = interval.as_secs();
        self.refresh_interval_ms = Some(millis(interval));
        self
    }

    /// Set a per-fetch deadline (zero means no deadline)
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = Some(millis(timeout));
        self
    }

    /// Fetch once right after start
    pub fn with_refresh_on_start(mut self, enabled: bool) -> Self {
        self.refresh_on_start = enabled;
        self
    }

    /// Get the refresh interval as a Duration, None when periodic refresh is disabled
    pub fn refresh_interval(&self) -> Option<Duration> {
        debug!(
            refresh_interval_secs = %self.refresh_interval_secs,
            refresh_interval_ms = ?self.refresh_interval_ms,
            "CoordinatorConfig::refresh_interval: called"
        );
        let interval = match self.refresh_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.refresh_interval_secs),
        };
        (!interval.is_zero()).then_some(interval)
    }

    /// Get the fetch deadline as a Duration, None when no deadline applies
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Check that the interval is within range
    pub fn validate(&self) -> Result<()> {
        match self.refresh_interval() {
            Some(interval) if interval > MAX_REFRESH_INTERVAL => Err(eyre!(
                "refresh interval {:?} exceeds the maximum of {:?}",
                interval, MAX_REFRESH_INTERVAL
            )),
            _ => Ok(()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
