//! Fetch sources usable by the `uc` host
//!
//! The coordinator itself is source-agnostic; this module holds the generic
//! sources the CLI wires up from configuration.

mod command;

pub use command::{CommandFetcher, OutputFormat, RESOURCE_ID_ENV};
