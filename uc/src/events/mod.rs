//! Event bus for coordinator observability
//!
//! Every coordinator emits lifecycle events onto an [`EventBus`]. Consumers
//! (the CLI, the JSONL [`EventLogger`]) subscribe to it.
//!
//! ```text
//!   Coordinator A ──┐                     ┌──> CLI output
//!   Coordinator B ──┼──> EventBus ────────┤
//!   Coordinator C ──┘  (broadcast)        └──> EventLogger (.jsonl)
//! ```
//!
//! Events are fire-and-forget: a coordinator never waits on a consumer.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use logger::{EventLogger, read_events, spawn_event_logger};
pub use types::{CoordEvent, EventLogEntry};
