//! Running one context's child process

use crate::core::{error::ContextError, Context, ExecutionRequest};
use crate::runtime::multiplexer::{LineSafeMultiplexer, OutputStream, PrefixedWriter};
use async_trait::async_trait;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

pub(crate) const READ_CHUNK_SIZE: usize = 8192;

/// Lifecycle of a single context run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one context's run, produced exactly once per context
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub context: Context,
    pub outcome: std::result::Result<(), ContextError>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(context: Context, duration: Duration) -> Self {
        Self {
            context,
            outcome: Ok(()),
            duration,
        }
    }

    pub fn failed(context: Context, error: ContextError, duration: Duration) -> Self {
        Self {
            context,
            outcome: Err(error),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Terminal state reached by the run
    pub fn state(&self) -> RunState {
        if self.is_success() {
            RunState::Succeeded
        } else {
            RunState::Failed
        }
    }

    pub fn error(&self) -> Option<&ContextError> {
        self.outcome.as_ref().err()
    }
}

/// Executes the request for one context
///
/// Implementations must not return early with an error: every failure is
/// captured in the returned [`ExecutionResult`].
#[async_trait]
pub trait ContextRunner: Send + Sync {
    async fn execute(
        &self,
        context: &Context,
        request: &ExecutionRequest,
        sink: &LineSafeMultiplexer,
    ) -> ExecutionResult;
}

/// Runs each context as a real child process
///
/// The child inherits the parent's environment and stdin, gets the selector
/// variable set to the context name, and has both output streams piped through
/// the multiplexer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_child(
        &self,
        context: &Context,
        request: &ExecutionRequest,
        sink: &LineSafeMultiplexer,
    ) -> std::result::Result<(), ContextError> {
        let (key, value) = request.env_override(context);
        let mut child = Command::new(request.program())
            .args(request.args())
            .env(key, value)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContextError::launch(request.program().to_string_lossy(), &e))?;

        debug!(workspace = %context, pid = ?child.id(), state = %RunState::Running, "child started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ContextError::Output("stdout pipe was unexpectedly not available".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ContextError::Output("stderr pipe was unexpectedly not available".into()))?;

        let stdout_task = tokio::spawn(pump(
            stdout,
            sink.writer(context, OutputStream::Stdout),
            None,
        ));
        let stderr_task = tokio::spawn(pump(
            stderr,
            sink.writer(context, OutputStream::Stderr),
            Some(StderrTail::default()),
        ));

        let (status, stdout_res, stderr_res) = tokio::join!(child.wait(), stdout_task, stderr_task);
        let status = status.map_err(|e| ContextError::Wait(e.to_string()))?;

        settle(
            status,
            stdout_res.map_err(|e| ContextError::Output(e.to_string())),
            stderr_res.map_err(|e| ContextError::Output(e.to_string())),
        )
    }
}

/// Decide a finished child's outcome
///
/// An abnormal exit always wins over forwarding problems on either pipe.
fn settle(
    status: ExitStatus,
    stdout: std::result::Result<PumpOutput, ContextError>,
    mut stderr: std::result::Result<PumpOutput, ContextError>,
) -> std::result::Result<(), ContextError> {
    if !status.success() {
        let detail = stderr
            .as_mut()
            .ok()
            .and_then(|pumped| pumped.tail.take())
            .and_then(StderrTail::into_detail);
        return Err(ContextError::Exited { status, detail });
    }

    let (stdout, stderr) = (stdout?, stderr?);
    if let Some(e) = stdout.forward_error.or(stderr.forward_error) {
        return Err(ContextError::Output(e.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ContextRunner for ProcessRunner {
    async fn execute(
        &self,
        context: &Context,
        request: &ExecutionRequest,
        sink: &LineSafeMultiplexer,
    ) -> ExecutionResult {
        debug!(
            workspace = %context,
            command = %request.display_command(),
            state = %RunState::Pending,
            "launching"
        );
        let started = Instant::now();

        match self.run_child(context, request, sink).await {
            Ok(()) => {
                let duration = started.elapsed();
                debug!(workspace = %context, state = %RunState::Succeeded, ?duration, "child finished");
                ExecutionResult::succeeded(context.clone(), duration)
            }
            Err(error) => {
                let duration = started.elapsed();
                warn!(workspace = %context, state = %RunState::Failed, %error, ?duration, "child failed");
                ExecutionResult::failed(context.clone(), error, duration)
            }
        }
    }
}

struct PumpOutput {
    forward_error: Option<std::io::Error>,
    tail: Option<StderrTail>,
}

/// Copy a child pipe into its prefixed writer until EOF
///
/// A failed console write does not stop the read loop: the pipe keeps being
/// drained so the child never blocks on a full pipe.
async fn pump<R>(mut reader: R, mut writer: PrefixedWriter, mut tail: Option<StderrTail>) -> PumpOutput
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut forward_error = None;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                forward_error = Some(e);
                break;
            }
        };

        if let Some(tail) = tail.as_mut() {
            tail.feed(&buf[..n]);
        }
        if forward_error.is_none() {
            if let Err(e) = writer.write_chunk(&buf[..n]) {
                forward_error = Some(e);
            }
        }
    }

    if forward_error.is_none() {
        if let Err(e) = writer.finish() {
            forward_error = Some(e);
        }
    }

    PumpOutput { forward_error, tail }
}

/// Tracks the most useful recent stderr line for error reports
///
/// Prefers the latest line starting with `Error:`, otherwise the latest
/// non-empty line. Escape sequences and box-drawing borders are removed.
#[derive(Debug, Default)]
struct StderrTail {
    current: Vec<u8>,
    last_line: Option<String>,
    last_error: Option<String>,
}

impl StderrTail {
    fn feed(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if b == b'\n' {
                self.end_line();
            } else {
                self.current.push(b);
            }
        }
    }

    fn end_line(&mut self) {
        let raw = String::from_utf8_lossy(&self.current).into_owned();
        self.current.clear();

        let line = clean_line(&raw);
        if line.is_empty() {
            return;
        }
        if line.starts_with("Error:") {
            self.last_error = Some(line.clone());
        }
        self.last_line = Some(line);
    }

    fn into_detail(mut self) -> Option<String> {
        if !self.current.is_empty() {
            self.end_line();
        }
        self.last_error.or(self.last_line)
    }
}

fn clean_line(raw: &str) -> String {
    strip_ansi(raw)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '│' | '╷' | '╵'))
        .to_string()
}

/// Remove CSI escape sequences such as color codes
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
