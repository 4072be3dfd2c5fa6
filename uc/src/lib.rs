//! updatecoord - Periodic refresh coordinator
//!
//! A coordinator owns one remote resource, refreshes it on a timer or on
//! demand, and fans every outcome out to registered listeners. Concurrent
//! refresh requests share a single fetch.
//!
//! # Modules
//!
//! - [`coordinator`] - The refresh actor, its handle and listener types
//! - [`events`] - Lifecycle events, broadcast bus and JSONL event log
//! - [`source`] - Fetch sources for the `uc` host (shell commands)
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use updatecoord::coordinator::{Coordinator, CoordinatorConfig};
//!
//! let config = CoordinatorConfig::new("thermostat", "device-7");
//! let (handle, _task) = Coordinator::spawn(config, |id: String| async move { read_sensor(&id).await });
//! let value = handle.request_refresh().await?;
//! ```

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod source;

pub use coordinator::{
    CoordError, Coordinator, CoordinatorConfig, CoordinatorHandle, Fetcher, Listener, Snapshot, Status, Subscription,
    Update,
};
pub use events::{CoordEvent, EventBus};
