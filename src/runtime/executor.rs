//! Concurrent fan-out over all contexts

use crate::core::{error::ContextError, Context, ExecutionRequest};
use crate::runtime::aggregate::{AggregateError, ErrorAggregator};
use crate::runtime::multiplexer::LineSafeMultiplexer;
use crate::runtime::runner::{ContextRunner, ExecutionResult, ProcessRunner};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Everything a fan-out produced: one result per context plus the aggregate
#[derive(Debug)]
pub struct FanOutReport {
    /// In the same order as the contexts passed in
    pub results: Vec<ExecutionResult>,
    pub error: Option<AggregateError>,
    pub elapsed: Duration,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn into_error(self) -> Option<AggregateError> {
        self.error
    }
}

/// Runs one task per context and waits for all of them
///
/// There is no cancellation: a failing context never stops its siblings, and
/// the executor only returns once every context has produced its result.
#[derive(Clone)]
pub struct FanOutExecutor {
    runner: Arc<dyn ContextRunner>,
    sink: LineSafeMultiplexer,
}

impl FanOutExecutor {
    pub fn new(runner: Arc<dyn ContextRunner>, sink: LineSafeMultiplexer) -> Self {
        Self { runner, sink }
    }

    /// Executor that spawns real child processes
    pub fn with_process_runner(sink: LineSafeMultiplexer) -> Self {
        Self::new(Arc::new(ProcessRunner::new()), sink)
    }

    /// Run `request` in every context; `None` if all of them succeeded
    pub async fn run(
        &self,
        contexts: Vec<Context>,
        request: ExecutionRequest,
    ) -> Option<AggregateError> {
        self.run_detailed(contexts, request).await.into_error()
    }

    /// Run `request` in every context and keep each context's result
    pub async fn run_detailed(
        &self,
        contexts: Vec<Context>,
        request: ExecutionRequest,
    ) -> FanOutReport {
        let started = Instant::now();
        let request = Arc::new(request);
        let aggregator = Arc::new(ErrorAggregator::new());

        info!(
            workspaces = contexts.len(),
            command = %request.display_command(),
            "fanning out"
        );

        let handles: Vec<_> = contexts
            .into_iter()
            .map(|context| {
                let runner = Arc::clone(&self.runner);
                let request = Arc::clone(&request);
                let sink = self.sink.clone();
                let aggregator = Arc::clone(&aggregator);
                let task_context = context.clone();

                let handle = tokio::spawn(async move {
                    let result = runner.execute(&task_context, &request, &sink).await;
                    if let Err(error) = &result.outcome {
                        aggregator.report(result.context.clone(), error.clone());
                    }
                    result
                });
                (context, handle)
            })
            .collect();

        // Barrier: every task is awaited, whatever happened to the others.
        let joined = join_all(
            handles
                .into_iter()
                .map(|(context, handle)| async move { (context, handle.await) }),
        )
        .await;

        let mut results = Vec::with_capacity(joined.len());
        for (context, joined) in joined {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    error!(workspace = %context, error = %join_err, "runner task did not complete");
                    let error = ContextError::Panicked(join_err.to_string());
                    aggregator.report(context.clone(), error.clone());
                    results.push(ExecutionResult::failed(context, error, Duration::ZERO));
                }
            }
        }

        let error = match Arc::try_unwrap(aggregator) {
            Ok(aggregator) => aggregator.result(),
            Err(shared) => shared.drain(),
        };

        let report = FanOutReport {
            results,
            error,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed = ?report.elapsed,
            "all workspaces finished"
        );
        report
    }
}

impl std::fmt::Debug for FanOutExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutExecutor")
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}
