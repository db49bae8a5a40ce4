use crate::cli::config::Config;
use crate::cli::error::Result;
use crate::runtime::{ContextSource, FanOutExecutor, LineSafeMultiplexer, WorkspaceList};
use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{info, warn};

/// Run a terraform sub-command in every workspace at once
///
/// Everything from the first argument that is not a `--fanout-*` option onwards
/// is forwarded unchanged to each workspace's process. A `--` in that first
/// position only ends the `--fanout-*` options; use `-- --` to forward one.
#[derive(Parser, Debug)]
#[command(name = "tf-fanout", author, version, about, long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long = "fanout-config", env = "TF_FANOUT_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Program to discover workspaces with and run in each of them
    #[arg(long = "fanout-program", env = "TF_FANOUT_PROGRAM", value_name = "PROGRAM")]
    pub program: Option<String>,

    /// Environment variable that selects the workspace
    #[arg(long = "fanout-env-var", env = "TF_FANOUT_ENV_VAR", value_name = "NAME")]
    pub selector_env: Option<String>,

    /// Color workspace prefixes
    #[arg(long = "fanout-color", env = "TF_FANOUT_COLOR")]
    pub color: bool,

    /// Enable debug logging
    #[arg(long = "fanout-verbose", env = "TF_FANOUT_VERBOSE")]
    pub verbose: bool,

    /// Do not print the workspace listing
    #[arg(long = "fanout-no-echo")]
    pub no_echo: bool,

    /// Print the effective configuration and exit
    #[arg(long = "fanout-print-config")]
    pub print_config: bool,

    /// Print help
    #[arg(long = "fanout-help", action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Print version
    #[arg(long = "fanout-version", action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Sub-command and arguments forwarded to every workspace
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_parser = clap::value_parser!(OsString)
    )]
    pub args: Vec<OsString>,
}

impl Cli {
    /// Load configuration from file, then merge with CLI args
    pub fn load_config(&self) -> Result<Config> {
        let config = Config::load(self.config.as_deref())?.merge_with_cli_args(self);
        config.validate()?;
        Ok(config)
    }

    /// Discover workspaces and fan the forwarded command out to all of them
    pub async fn execute(self, config: Config) -> Result<()> {
        if self.print_config {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }

        let source = WorkspaceList::new(config.program.as_str(), config.discovery_options());
        let contexts = source.contexts().await?;
        if contexts.is_empty() {
            warn!(
                sentinel = %config.discovery.default_sentinel,
                "no workspaces besides the default one; nothing to run"
            );
            return Ok(());
        }
        info!(
            workspaces = ?contexts.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "running in workspaces"
        );

        let request = config.request(self.args);
        let sink = LineSafeMultiplexer::stdio().with_color(config.output.color);
        let executor = FanOutExecutor::with_process_runner(sink);

        match executor.run(contexts, request).await {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
