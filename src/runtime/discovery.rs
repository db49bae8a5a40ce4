//! Workspace discovery
//!
//! Turns the output of `terraform workspace list` into the ordered list of
//! contexts to fan out over.

use crate::core::{
    error::{Error, Result},
    Context,
};
use crate::runtime::runner::READ_CHUNK_SIZE;
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::Write;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

/// Produces the contexts for one invocation
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Ordered, duplicate-free context names
    async fn contexts(&self) -> Result<Vec<Context>>;
}

#[async_trait]
impl ContextSource for Vec<Context> {
    async fn contexts(&self) -> Result<Vec<Context>> {
        Ok(self.clone())
    }
}

/// How the listing command is invoked and its output filtered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Arguments passed to the program to list workspaces
    pub args: Vec<String>,
    /// Name that is never treated as a context
    pub default_sentinel: String,
    /// Leading marker stripped from each line (the current-workspace `*`)
    pub marker: Option<char>,
    /// Copy the listing to stdout as it is read
    pub echo: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            args: vec!["workspace".to_string(), "list".to_string()],
            default_sentinel: "default".to_string(),
            marker: Some('*'),
            echo: true,
        }
    }
}

/// Extract context names from a workspace listing
///
/// Each line loses one leading marker, is trimmed, and is skipped if it is
/// blank or the default sentinel. Later duplicates are dropped.
///
/// ```rust
/// use tf_fanout::{parse_workspace_list, DiscoveryOptions};
///
/// let contexts = parse_workspace_list("* default\n\n  foo\n*bar\n", &DiscoveryOptions::default());
/// let names: Vec<&str> = contexts.iter().map(|c| c.name()).collect();
/// assert_eq!(names, ["foo", "bar"]);
/// ```
pub fn parse_workspace_list(listing: &str, options: &DiscoveryOptions) -> Vec<Context> {
    let mut seen = HashSet::new();
    listing
        .lines()
        .map(|line| match options.marker {
            Some(marker) => line.strip_prefix(marker).unwrap_or(line),
            None => line,
        })
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != options.default_sentinel)
        .filter(|name| seen.insert(name.to_string()))
        .map(Context::new)
        .collect()
}

/// Discovers contexts by running the workspace listing command
#[derive(Debug, Clone)]
pub struct WorkspaceList {
    program: OsString,
    options: DiscoveryOptions,
}

impl WorkspaceList {
    pub fn new(program: impl Into<OsString>, options: DiscoveryOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    async fn listing(&self) -> Result<String> {
        let program = which::which(&self.program).map_err(|e| {
            Error::discovery(format!(
                "cannot find '{}': {}",
                self.program.to_string_lossy(),
                e
            ))
        })?;
        debug!(program = %program.display(), args = ?self.options.args, "listing workspaces");

        let mut child = Command::new(&program)
            .args(&self.options.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::discovery(format!("failed to run {}: {}", program.display(), e))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::discovery("listing stdout was not captured"))?;

        let captured = tee(stdout, self.options.echo.then(std::io::stdout)).await?;
        let status = child.wait().await.map_err(|e| {
            Error::discovery(format!("failed to wait for {}: {}", program.display(), e))
        })?;

        if !status.success() {
            return Err(Error::discovery(format!(
                "{} {} {}",
                program.display(),
                self.options.args.join(" "),
                status
            )));
        }

        String::from_utf8(captured)
            .map_err(|e| Error::discovery(format!("workspace listing is not valid UTF-8: {e}")))
    }
}

/// Read `reader` to EOF, copying each chunk to `echo` as soon as it arrives
async fn tee<R, W>(mut reader: R, mut echo: Option<W>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        captured.extend_from_slice(&buf[..n]);
        if let Some(out) = echo.as_mut() {
            out.write_all(&buf[..n])?;
            out.flush()?;
        }
    }
    Ok(captured)
}

#[async_trait]
impl ContextSource for WorkspaceList {
    async fn contexts(&self) -> Result<Vec<Context>> {
        let listing = self.listing().await?;
        let contexts = parse_workspace_list(&listing, &self.options);
        info!(count = contexts.len(), "discovered workspaces");
        Ok(contexts)
    }
}
