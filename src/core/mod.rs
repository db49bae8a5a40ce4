//! Core types shared by discovery, the runners and the CLI.

pub mod error;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::sync::Arc;

/// One named execution unit, e.g. a terraform workspace
///
/// Cheap to clone; the name is shared and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Context {
    name: Arc<str>,
}

impl Context {
    /// Create a context from a workspace name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    /// The workspace name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line prefix used for this context's output: `"<name>: "`
    pub fn prefix(&self) -> String {
        format!("{}: ", self.name)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Context {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Context {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// The command every context runs, identical across contexts
///
/// Only the selector variable differs per context: it is set to the context
/// name in each child's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    program: OsString,
    args: Vec<OsString>,
    selector_env: String,
}

impl ExecutionRequest {
    /// Build a request forwarding `args` verbatim to `program`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tf_fanout::{Context, ExecutionRequest};
    ///
    /// let request = ExecutionRequest::new("terraform", ["plan", "-lock=false"], "TF_WORKSPACE");
    /// let prod = Context::new("prod");
    /// let (key, value) = request.env_override(&prod);
    /// assert_eq!(key, "TF_WORKSPACE");
    /// assert_eq!(value, "prod");
    /// ```
    pub fn new<P, I, A>(program: P, args: I, selector_env: impl Into<String>) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            selector_env: selector_env.into(),
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Name of the environment variable that selects the context
    pub fn selector_env(&self) -> &str {
        &self.selector_env
    }

    /// The single environment override applied to `context`'s child process
    pub fn env_override<'a>(&'a self, context: &'a Context) -> (&'a str, &'a str) {
        (&self.selector_env, context.name())
    }

    /// Program and arguments rendered for log output
    pub fn display_command(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
