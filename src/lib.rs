//! # tf-fanout
//!
//! Runs a single terraform sub-command in every workspace at once.
//!
//! The workspace list is discovered from `terraform workspace list`, one child
//! process is launched per workspace with `TF_WORKSPACE` pointing at it, and
//! every line those children print is prefixed with the workspace name. Output
//! from different workspaces may interleave, but never inside a line.
//! Failures are collected and reported together once every workspace is done.
//!
//! ```rust,no_run
//! use tf_fanout::{Context, ExecutionRequest, FanOutExecutor, LineSafeMultiplexer};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let contexts = vec![Context::new("staging"), Context::new("prod")];
//! let request = ExecutionRequest::new("terraform", ["plan"], "TF_WORKSPACE");
//!
//! let executor = FanOutExecutor::with_process_runner(LineSafeMultiplexer::stdio());
//! if let Some(err) = executor.run(contexts, request).await {
//!     eprintln!("{err}");
//!     std::process::exit(1);
//! }
//! # }
//! ```

pub mod core;
pub mod runtime;

#[cfg(feature = "cli")]
pub mod cli;

pub use crate::core::{
    error::{ContextError, Error, Result},
    Context, ExecutionRequest,
};
pub use crate::runtime::{
    aggregate::{AggregateError, ContextFailure, ErrorAggregator},
    discovery::{parse_workspace_list, ContextSource, DiscoveryOptions, WorkspaceList},
    executor::{FanOutExecutor, FanOutReport},
    multiplexer::{LineSafeMultiplexer, MemorySink, OutputStream, PrefixedWriter},
    runner::{ContextRunner, ExecutionResult, ProcessRunner, RunState},
};
