use crate::core::error::Error as FanoutError;
use crate::runtime::aggregate::AggregateError;
use thiserror::Error;

/// Error type for the tf-fanout command line
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Workspace discovery error: {0}")]
    Discovery(String),

    #[error("{0}")]
    Execution(AggregateError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Get user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Discovery(msg) => {
                format!(
                    "Could not list workspaces: {}. Check that the program is on PATH and the working directory is initialized ('terraform init').",
                    msg
                )
            }
            Self::Configuration(msg) => {
                format!(
                    "Configuration error: {}. Fix the config file or pass --fanout-config with a valid path.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}

impl From<FanoutError> for CliError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::Discovery(msg) => Self::Discovery(msg),
            FanoutError::Io(e) => Self::Io(e),
        }
    }
}

impl From<AggregateError> for CliError {
    fn from(err: AggregateError) -> Self {
        Self::Execution(err)
    }
}

/// Convenient result type for the command line
pub type Result<T> = std::result::Result<T, CliError>;
