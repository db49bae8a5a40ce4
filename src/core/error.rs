use std::process::ExitStatus;
use thiserror::Error;

/// Library error type
#[derive(Error, Debug)]
pub enum Error {
    /// The workspace list could not be obtained; nothing was launched
    #[error("Workspace discovery failed: {0}")]
    Discovery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }
}

/// Failure of a single context, captured at the runner boundary
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// The child process could not be started
    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    /// The child process ran and terminated abnormally
    #[error("{status}{}", detail_suffix(.detail))]
    Exited {
        status: ExitStatus,
        /// Last non-empty line the child wrote to stderr
        detail: Option<String>,
    },

    /// The child started but its exit status could not be collected
    #[error("failed to wait for child: {0}")]
    Wait(String),

    /// Forwarding the child's output to the console failed
    #[error("output forwarding failed: {0}")]
    Output(String),

    /// The runner task itself panicked
    #[error("runner panicked: {0}")]
    Panicked(String),
}

impl ContextError {
    pub fn launch(program: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            message: err.to_string(),
        }
    }

    /// Exit code of the child, if it exited normally with one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { status, .. } => status.code(),
            _ => None,
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

/// Convenient result type for the library
pub type Result<T> = std::result::Result<T, Error>;
