//! Collection of per-context failures into one composite error

use crate::core::{error::ContextError, Context};
use parking_lot::Mutex;
use std::fmt;

/// One failing context and why it failed
#[derive(Debug, Clone)]
pub struct ContextFailure {
    pub context: Context,
    pub error: ContextError,
}

impl fmt::Display for ContextFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

/// Every failure reported during one fan-out
///
/// Never empty: an aggregator with no reports yields `None` instead.
/// Entry order reflects report order, which is not deterministic across contexts.
#[derive(Debug, Clone)]
pub struct AggregateError {
    failures: Vec<ContextFailure>,
}

impl AggregateError {
    pub fn failures(&self) -> &[ContextFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the failing contexts, in report order
    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.failures.iter().map(|failure| &failure.context)
    }

    /// The failure recorded for `name`, if that context failed
    pub fn get(&self, name: &str) -> Option<&ContextError> {
        self.failures
            .iter()
            .find(|failure| failure.context.name() == name)
            .map(|failure| &failure.error)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.failures.len() == 1 {
            "workspace"
        } else {
            "workspaces"
        };
        write!(f, "{} {} failed:", self.failures.len(), noun)?;
        for failure in &self.failures {
            write!(f, "\n\t* {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl IntoIterator for AggregateError {
    type Item = ContextFailure;
    type IntoIter = std::vec::IntoIter<ContextFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

/// Thread-safe sink for per-context failures
///
/// Runners share it by reference and call [`report`](Self::report) at most once
/// each. [`result`](Self::result) consumes the aggregator, so it can only be read
/// once every runner has released its reference.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    failures: Mutex<Vec<ContextFailure>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `context`
    pub fn report(&self, context: Context, error: ContextError) {
        tracing::debug!(workspace = %context, error = %error, "recording workspace failure");
        self.failures.lock().push(ContextFailure { context, error });
    }

    /// Number of failures recorded so far
    pub fn failure_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// The aggregate error, or `None` if nothing was reported
    pub fn result(self) -> Option<AggregateError> {
        let failures = self.failures.into_inner();
        if failures.is_empty() {
            None
        } else {
            Some(AggregateError { failures })
        }
    }

    /// Like [`result`](Self::result) for an aggregator still behind a shared
    /// reference; only valid once every reporter has finished
    pub(crate) fn drain(&self) -> Option<AggregateError> {
        let failures = std::mem::take(&mut *self.failures.lock());
        if failures.is_empty() {
            None
        } else {
            Some(AggregateError { failures })
        }
    }
}
