//! Line-safe output multiplexing
//!
//! Every runner writes its child's output through a [`PrefixedWriter`] obtained
//! from the shared [`LineSafeMultiplexer`]. The writer buffers bytes until it sees
//! a newline, then emits the whole prefixed line as a single write while holding
//! the sink's lock. Lines from different contexts can interleave; bytes within a
//! line cannot.

use crate::core::Context;
use bytes::{Bytes, BytesMut};
use colored::{Color, Colorize};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Which console stream a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A writer shared by every context, locked for exactly one line at a time
#[derive(Clone)]
struct SharedSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedSink {
    fn new(writer: impl Write + Send + 'static) -> Self {
        let writer: Box<dyn Write + Send> = Box::new(writer);
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.lock();
        writer.write_all(line)?;
        writer.flush()
    }
}

/// Shared console sink for all contexts of one fan-out
///
/// Cloning is cheap and yields a handle to the same underlying streams.
#[derive(Clone)]
pub struct LineSafeMultiplexer {
    stdout: SharedSink,
    stderr: SharedSink,
    color: bool,
}

impl LineSafeMultiplexer {
    /// Multiplex onto arbitrary output and error writers
    pub fn new(
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        Self {
            stdout: SharedSink::new(stdout),
            stderr: SharedSink::new(stderr),
            color: false,
        }
    }

    /// Multiplex onto the process's own stdout and stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Color each context's prefix
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// A line-buffering writer for one context on one stream
    ///
    /// Each context should use a single writer per stream; lines written through
    /// it reach the sink in the order they were written.
    pub fn writer(&self, context: &Context, stream: OutputStream) -> PrefixedWriter {
        let sink = match stream {
            OutputStream::Stdout => self.stdout.clone(),
            OutputStream::Stderr => self.stderr.clone(),
        };
        let prefix = if self.color {
            context
                .prefix()
                .color(prefix_color(context))
                .to_string()
        } else {
            context.prefix()
        };

        PrefixedWriter {
            sink,
            prefix: Bytes::from(prefix),
            pending: BytesMut::new(),
        }
    }
}

impl std::fmt::Debug for LineSafeMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSafeMultiplexer")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

/// Stable color for a context's prefix
fn prefix_color(context: &Context) -> Color {
    let hash = context
        .name()
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    match hash % 6 {
        0 => Color::Red,
        1 => Color::Green,
        2 => Color::Yellow,
        3 => Color::Blue,
        4 => Color::Magenta,
        _ => Color::Cyan,
    }
}

/// Per-context, per-stream line buffer in front of a shared sink
///
/// Unterminated output is held until a newline arrives or [`finish`](Self::finish)
/// is called. Dropping the writer finishes it.
pub struct PrefixedWriter {
    sink: SharedSink,
    prefix: Bytes,
    pending: BytesMut,
}

impl PrefixedWriter {
    /// Buffer `chunk`, emitting every line it completes
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        // Bytes already pending were scanned by earlier calls
        let mut from = self.pending.len();
        self.pending.extend_from_slice(chunk);
        while let Some(offset) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let line = self.pending.split_to(from + offset + 1);
            self.emit(&line)?;
            from = 0;
        }
        Ok(())
    }

    /// Emit any trailing partial line, newline-terminated
    pub fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut rest = self.pending.split();
        rest.extend_from_slice(b"\n");
        self.emit(&rest)
    }

    /// Bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn emit(&self, line: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(self.prefix.len() + line.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(line);
        self.sink.write_line(&out)
    }
}

impl Write for PrefixedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    /// Partial lines stay buffered; only complete lines ever reach the sink
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PrefixedWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::debug!(error = %e, "dropping unflushed partial line");
        }
    }
}

/// In-memory sink recording every write it receives
///
/// Clones share the same buffer, so one clone can be handed to a
/// [`LineSafeMultiplexer`] and another kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each individual `write` call, in arrival order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// All bytes written, concatenated
    pub fn contents(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    /// The written output split into lines, lossily decoded
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.contents())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
