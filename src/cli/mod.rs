//! Command-line front end for tf-fanout
//!
//! ## Usage
//!
//! ```bash
//! # Plan every workspace
//! tf-fanout plan
//!
//! # Arguments are forwarded untouched
//! tf-fanout apply -auto-approve -parallelism=4
//!
//! # Options for tf-fanout itself come first and carry a --fanout- prefix
//! tf-fanout --fanout-program tofu --fanout-color plan
//! ```

pub mod cli;
pub mod config;
pub mod error;


// Re-export commonly used types
pub use error::{CliError, Result};

/// Version information for the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for the configuration file
pub fn default_config_dir() -> std::path::PathBuf {
    directories::ProjectDirs::from("", "", "tf-fanout")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            // Fallback to home directory if project dirs not available
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".tf-fanout")
        })
}
