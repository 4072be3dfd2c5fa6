//! Coordinator for periodic data refresh
//!
//! A Coordinator keeps the latest value of one resource fresh and shares it:
//! - **Refresh:** timer-driven or on request, at most one fetch in flight
//! - **Cache:** the last good value stays readable without a fetch
//! - **Fan-out:** every completed refresh notifies each listener exactly once

mod config;
mod core;
mod error;
mod fetcher;
mod handle;
mod listener;
mod messages;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use error::CoordError;
pub use fetcher::Fetcher;
pub use handle::CoordinatorHandle;
pub use listener::{Listener, Subscription, Update};
pub use messages::{CoordRequest, CoordinatorMetrics, RefreshResult, Snapshot, Status};
