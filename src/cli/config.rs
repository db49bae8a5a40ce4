use crate::cli::error::{CliError, Result};
use crate::core::ExecutionRequest;
use crate::runtime::discovery::DiscoveryOptions;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Configuration settings for tf-fanout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Program run for discovery and in every workspace
    #[serde(default = "default_program")]
    pub program: String,

    /// Environment variable that selects the workspace in each child
    #[serde(default = "default_selector_env")]
    pub selector_env: String,

    /// Enable debug logging
    #[serde(default)]
    pub verbose: bool,

    /// Workspace discovery settings
    #[serde(default)]
    pub discovery: DiscoveryDefaults,

    /// Output formatting preferences
    #[serde(default)]
    pub output: OutputDefaults,
}

/// Workspace discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDefaults {
    /// Arguments that make the program list its workspaces
    #[serde(default = "default_list_args")]
    pub args: Vec<String>,

    /// Workspace name that is never fanned out to
    #[serde(default = "default_sentinel")]
    pub default_sentinel: String,

    /// Marker in front of the currently selected workspace; empty for none
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Print the workspace listing before running
    #[serde(default = "default_true")]
    pub echo: bool,
}

/// Output formatting defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDefaults {
    /// Color each workspace's line prefix
    #[serde(default)]
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: default_program(),
            selector_env: default_selector_env(),
            verbose: false,
            discovery: DiscoveryDefaults::default(),
            output: OutputDefaults::default(),
        }
    }
}

impl Default for DiscoveryDefaults {
    fn default() -> Self {
        Self {
            args: default_list_args(),
            default_sentinel: default_sentinel(),
            marker: default_marker(),
            echo: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CliError::configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    /// Load from an explicit path, or from the default location if one exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::configuration(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::load_from_file(path)
            }
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        crate::cli::default_config_dir().join("config.toml")
    }

    /// Merge with command-line arguments, giving priority to CLI args
    pub fn merge_with_cli_args(mut self, cli_args: &crate::cli::cli::Cli) -> Self {
        if let Some(ref program) = cli_args.program {
            self.program = program.clone();
        }
        if let Some(ref selector_env) = cli_args.selector_env {
            self.selector_env = selector_env.clone();
        }
        if cli_args.verbose {
            self.verbose = true;
        }
        if cli_args.color {
            self.output.color = true;
        }
        if cli_args.no_echo {
            self.discovery.echo = false;
        }

        self
    }

    /// Reject settings that cannot produce a working fan-out
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(CliError::configuration("program must not be empty"));
        }
        if self.selector_env.is_empty()
            || self.selector_env.contains('=')
            || self.selector_env.contains('\0')
        {
            return Err(CliError::configuration(format!(
                "invalid selector variable name '{}'",
                self.selector_env
            )));
        }
        if self.discovery.marker.chars().count() > 1 {
            return Err(CliError::configuration(format!(
                "marker must be a single character, got '{}'",
                self.discovery.marker
            )));
        }
        Ok(())
    }

    /// Discovery settings for the runtime
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            args: self.discovery.args.clone(),
            default_sentinel: self.discovery.default_sentinel.clone(),
            marker: self.discovery.marker.chars().next(),
            echo: self.discovery.echo,
        }
    }

    /// The request forwarded to every workspace
    pub fn request(&self, args: Vec<OsString>) -> ExecutionRequest {
        ExecutionRequest::new(self.program.as_str(), args, self.selector_env.as_str())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            CliError::configuration(format!("Failed to serialize config: {}", e))
        })
    }
}

// Helper functions for default values
fn default_program() -> String {
    "terraform".to_string()
}

fn default_selector_env() -> String {
    "TF_WORKSPACE".to_string()
}

fn default_list_args() -> Vec<String> {
    vec!["workspace".to_string(), "list".to_string()]
}

fn default_sentinel() -> String {
    "default".to_string()
}

fn default_marker() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}
