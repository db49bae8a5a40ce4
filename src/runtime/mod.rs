//! Fan-out runtime
//!
//! This module handles:
//! - Discovering the workspaces to run in
//! - Launching one child process per workspace, all at once
//! - Multiplexing their output onto the console line by line
//! - Collecting per-workspace failures into one error

pub mod aggregate;
pub mod discovery;
pub mod executor;
pub mod multiplexer;
pub mod runner;

#[cfg(test)]
mod execution_test;

pub use aggregate::{AggregateError, ContextFailure, ErrorAggregator};
pub use discovery::{parse_workspace_list, ContextSource, DiscoveryOptions, WorkspaceList};
pub use executor::{FanOutExecutor, FanOutReport};
pub use multiplexer::{LineSafeMultiplexer, MemorySink, OutputStream, PrefixedWriter};
pub use runner::{ContextRunner, ExecutionResult, ProcessRunner, RunState};
