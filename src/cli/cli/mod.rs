//! Command-line parsing and the top-level run

pub mod app;

pub use app::Cli;
