//! Fan-out tests
//!
//! Simulated runners exercise the executor's isolation, barrier and ordering
//! guarantees; on unix the real process runner is driven through `sh`.

use super::*;
use crate::core::{error::ContextError, Context, ExecutionRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a simulated context does when run
#[derive(Debug, Clone, Default)]
struct Script {
    chunks: Vec<Vec<u8>>,
    delay: Duration,
    fail: Option<String>,
    panic: bool,
}

/// Runner that replays scripted output instead of spawning processes
#[derive(Default)]
struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedRunner {
    fn with(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContextRunner for ScriptedRunner {
    async fn execute(
        &self,
        context: &Context,
        _request: &ExecutionRequest,
        sink: &LineSafeMultiplexer,
    ) -> ExecutionResult {
        *self.calls.lock().entry(context.name().to_string()).or_default() += 1;
        let started = Instant::now();
        let script = self.scripts.get(context.name()).cloned().unwrap_or_default();

        let mut writer = sink.writer(context, OutputStream::Stdout);
        for chunk in &script.chunks {
            if script.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(script.delay).await;
            }
            writer.write_chunk(chunk).unwrap();
        }
        if script.chunks.is_empty() && !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        writer.finish().unwrap();

        if script.panic {
            panic!("scripted panic in {}", context);
        }
        match script.fail {
            Some(msg) => ExecutionResult::failed(
                context.clone(),
                ContextError::Output(msg),
                started.elapsed(),
            ),
            None => ExecutionResult::succeeded(context.clone(), started.elapsed()),
        }
    }
}

fn request() -> ExecutionRequest {
    ExecutionRequest::new("terraform", ["plan"], "TF_WORKSPACE")
}

fn contexts(names: &[&str]) -> Vec<Context> {
    names.iter().map(|n| Context::new(n)).collect()
}

fn memory_executor(runner: Arc<dyn ContextRunner>) -> (FanOutExecutor, MemorySink, MemorySink) {
    let out = MemorySink::new();
    let err = MemorySink::new();
    let mux = LineSafeMultiplexer::new(out.clone(), err.clone());
    (FanOutExecutor::new(runner, mux), out, err)
}

fn failing(msg: &str) -> Script {
    Script {
        fail: Some(msg.to_string()),
        ..Script::default()
    }
}

fn failing_names(err: &AggregateError) -> HashSet<String> {
    err.contexts().map(|c| c.name().to_string()).collect()
}

#[tokio::test]
async fn test_every_context_produces_exactly_one_result() {
    let runner = Arc::new(
        ScriptedRunner::default()
            .with("b", failing("boom"))
            .with("d", failing("bang")),
    );
    let (executor, _, _) = memory_executor(runner.clone());
    let names = ["a", "b", "c", "d", "e"];

    let report = executor.run_detailed(contexts(&names), request()).await;

    assert_eq!(report.results.len(), names.len());
    let returned: Vec<&str> = report.results.iter().map(|r| r.context.name()).collect();
    assert_eq!(returned, names);
    for name in names {
        assert_eq!(runner.calls(name), 1, "{name} should run exactly once");
    }
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 2);
}

#[tokio::test]
async fn test_all_success_means_no_aggregate() {
    let (executor, _, _) = memory_executor(Arc::new(ScriptedRunner::default()));
    let err = executor.run(contexts(&["a", "b", "c"]), request()).await;
    assert!(err.is_none());
}

#[tokio::test]
async fn test_empty_context_list() {
    let (executor, out, _) = memory_executor(Arc::new(ScriptedRunner::default()));
    let report = executor.run_detailed(Vec::new(), request()).await;
    assert!(report.results.is_empty());
    assert!(report.error.is_none());
    assert!(out.writes().is_empty());
}

#[tokio::test]
async fn test_k_failures_are_all_reported() {
    let runner = ScriptedRunner::default()
        .with("prod", failing("lock held"))
        .with("qa", failing("no such bucket"))
        .with("dev", failing("timeout"));
    let (executor, _, _) = memory_executor(Arc::new(runner));

    let err = executor
        .run(contexts(&["staging", "prod", "qa", "dev", "sandbox"]), request())
        .await
        .expect("three contexts failed");

    assert_eq!(err.len(), 3);
    let expected: HashSet<String> = ["prod", "qa", "dev"].iter().map(|s| s.to_string()).collect();
    assert_eq!(failing_names(&err), expected);
    assert!(err.get("prod").unwrap().to_string().contains("lock held"));
    assert!(err.to_string().starts_with("3 workspaces failed:"));
}

#[tokio::test]
async fn test_failure_does_not_cancel_slower_siblings() {
    let runner = ScriptedRunner::default()
        .with("fast-fail", failing("early"))
        .with(
            "slow",
            Script {
                chunks: vec![b"still here\n".to_vec()],
                delay: Duration::from_millis(100),
                ..Script::default()
            },
        );
    let (executor, out, _) = memory_executor(Arc::new(runner));

    let report = executor
        .run_detailed(contexts(&["fast-fail", "slow"]), request())
        .await;

    assert!(report.results[1].is_success());
    assert_eq!(out.lines(), vec!["slow: still here"]);
    assert_eq!(report.error.unwrap().len(), 1);
}

#[tokio::test]
async fn test_panicking_runner_is_isolated() {
    let runner = ScriptedRunner::default().with(
        "bad",
        Script {
            panic: true,
            ..Script::default()
        },
    );
    let (executor, _, _) = memory_executor(Arc::new(runner));

    let report = executor
        .run_detailed(contexts(&["good", "bad", "also-good"]), request())
        .await;

    assert_eq!(report.results.len(), 3);
    assert!(report.results[0].is_success());
    assert!(matches!(report.results[1].error(), Some(ContextError::Panicked(_))));
    assert!(report.results[2].is_success());

    let err = report.error.unwrap();
    assert_eq!(err.len(), 1);
    assert!(err.get("bad").is_some());
}

#[tokio::test]
async fn test_fan_out_runs_contexts_in_parallel() {
    let delay = Duration::from_millis(200);
    let mut runner = ScriptedRunner::default();
    let names = ["w1", "w2", "w3", "w4", "w5"];
    for name in names {
        runner = runner.with(
            name,
            Script {
                delay,
                ..Script::default()
            },
        );
    }
    let (executor, _, _) = memory_executor(Arc::new(runner));

    let started = Instant::now();
    let report = executor.run_detailed(contexts(&names), request()).await;
    let elapsed = started.elapsed();

    assert_eq!(report.results.len(), 5);
    assert!(elapsed >= delay);
    assert!(
        elapsed < delay * 3,
        "fan-out took {elapsed:?}, expected close to {delay:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_partial_writes_keep_lines_whole() {
    let mut runner = ScriptedRunner::default();
    let names = ["alpha", "beta", "gamma", "delta"];
    for (i, name) in names.iter().enumerate() {
        let text: String = (0..20).map(|n| format!("{name} line {n}\n")).collect();
        let chunks = text
            .as_bytes()
            .chunks(3 + i)
            .map(<[u8]>::to_vec)
            .collect();
        runner = runner.with(
            name,
            Script {
                chunks,
                delay: Duration::from_millis(1),
                ..Script::default()
            },
        );
    }
    let (executor, out, _) = memory_executor(Arc::new(runner));

    assert!(executor.run(contexts(&names), request()).await.is_none());

    let mut seen: HashMap<&str, Vec<String>> = HashMap::new();
    for write in out.writes() {
        let line = String::from_utf8(write).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let (owner, body) = line.trim_end().split_once(": ").unwrap();
        assert!(body.starts_with(owner), "line {line:?} mixes contexts");
        let owner = *names.iter().find(|n| **n == owner).unwrap();
        seen.entry(owner).or_default().push(body.to_string());
    }
    for name in names {
        let expected: Vec<String> = (0..20).map(|n| format!("{name} line {n}")).collect();
        assert_eq!(seen[name], expected);
    }
}

prop_compose! {
    fn context_output()(
        lines in prop::collection::vec("[a-z0-9 ]{0,24}", 1..8),
        chunk in 1usize..9,
        trailing_newline in any::<bool>(),
    ) -> (Vec<String>, usize, bool) {
        (lines, chunk, trailing_newline)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_lines_are_never_mixed_and_stay_ordered(
        outputs in prop::collection::vec(context_output(), 2..6),
    ) {
        let names: Vec<String> = (0..outputs.len()).map(|i| format!("ws{i}")).collect();
        let mut runner = ScriptedRunner::default();
        for (name, (lines, chunk, trailing_newline)) in names.iter().zip(&outputs) {
            let mut text = lines.join("\n");
            if *trailing_newline {
                text.push('\n');
            }
            let chunks = text.as_bytes().chunks(*chunk).map(<[u8]>::to_vec).collect();
            runner = runner.with(name, Script { chunks, ..Script::default() });
        }
        let (executor, out, _) = memory_executor(Arc::new(runner));
        let ctxs: Vec<Context> = names.iter().map(Context::new).collect();

        let report = tokio_test::block_on(executor.run_detailed(ctxs, request()));
        prop_assert_eq!(report.results.len(), names.len());
        prop_assert!(report.error.is_none());

        let mut seen: HashMap<String, Vec<String>> = HashMap::new();
        for write in out.writes() {
            let line = String::from_utf8(write).unwrap();
            prop_assert!(line.ends_with('\n'));
            prop_assert_eq!(line.matches('\n').count(), 1);
            let (owner, body) = line.strip_suffix('\n').unwrap().split_once(": ").unwrap();
            prop_assert!(names.iter().any(|n| n == owner));
            seen.entry(owner.to_string()).or_default().push(body.to_string());
        }
        for (name, (lines, _, trailing_newline)) in names.iter().zip(&outputs) {
            let mut expected = lines.clone();
            if !*trailing_newline && expected.last().map_or(false, |l| l.is_empty()) {
                // A bare trailing "" with no newline is no output at all.
                expected.pop();
            }
            let got = seen.remove(name).unwrap_or_default();
            prop_assert_eq!(got, expected);
        }
    }
}

#[cfg(unix)]
mod process {
    use super::*;

    fn sh(script: &str) -> ExecutionRequest {
        ExecutionRequest::new("sh", ["-c", script, "sh", "plan"], "TF_WORKSPACE")
    }

    fn process_executor() -> (FanOutExecutor, MemorySink, MemorySink) {
        memory_executor(Arc::new(ProcessRunner::new()))
    }

    #[tokio::test]
    async fn test_staging_succeeds_prod_fails_with_lock_held() {
        let (executor, out, err) = process_executor();
        let script = r#"
            if [ "$TF_WORKSPACE" = prod ]; then
                echo "Acquiring state lock"
                echo "lock held" >&2
                exit 1
            fi
            echo "running $1"
            echo "No changes."
        "#;

        let report = executor
            .run_detailed(contexts(&["staging", "prod"]), sh(script))
            .await;

        let aggregate = report.error.expect("prod failed");
        assert_eq!(aggregate.len(), 1);
        let prod_err = aggregate.get("prod").expect("prod entry");
        assert_eq!(prod_err.exit_code(), Some(1));
        assert!(prod_err.to_string().contains("lock held"));
        assert!(aggregate.to_string().contains("prod: "));

        let stdout = out.lines();
        let staging: Vec<&String> = stdout.iter().filter(|l| l.starts_with("staging: ")).collect();
        assert_eq!(staging, vec!["staging: running plan", "staging: No changes."]);
        assert!(stdout
            .iter()
            .all(|l| l.starts_with("staging: ") || l.starts_with("prod: ")));
        assert_eq!(err.lines(), vec!["prod: lock held"]);
    }

    #[tokio::test]
    async fn test_selector_override_wins_and_env_is_inherited() {
        let (executor, out, _) = process_executor();
        // HOME always exists in the parent; the override must replace it.
        let request = ExecutionRequest::new(
            "sh",
            ["-c", r#"echo "selected=$HOME"; [ -n "$PATH" ] && echo path-inherited"#],
            "HOME",
        );

        let err = executor.run(contexts(&["blue", "green"]), request).await;
        assert!(err.is_none());

        let lines: HashSet<String> = out.lines().into_iter().collect();
        for name in ["blue", "green"] {
            assert!(lines.contains(&format!("{name}: selected={name}")));
            assert!(lines.contains(&format!("{name}: path-inherited")));
        }
    }

    #[tokio::test]
    async fn test_launch_failure_is_captured_per_context() {
        let (executor, _, _) = process_executor();
        let request = ExecutionRequest::new("definitely-not-a-real-program-4b1d", ["plan"], "TF_WORKSPACE");

        let report = executor.run_detailed(contexts(&["a", "b"]), request).await;

        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert!(matches!(result.error(), Some(ContextError::Launch { .. })));
        }
        assert_eq!(report.error.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trailing_partial_line_is_flushed() {
        let (executor, out, _) = process_executor();
        let err = executor
            .run(contexts(&["ws"]), sh("printf 'first\\nno newline'"))
            .await;
        assert!(err.is_none());
        assert_eq!(out.lines(), vec!["ws: first", "ws: no newline"]);
    }

    #[tokio::test]
    async fn test_killed_child_is_reported() {
        let (executor, _, _) = process_executor();
        let err = executor
            .run(contexts(&["ws"]), sh("kill -9 $$"))
            .await
            .expect("killed child is a failure");
        let ws_err = err.get("ws").unwrap();
        assert_eq!(ws_err.exit_code(), None);
        assert!(matches!(ws_err, ContextError::Exited { .. }));
    }

    /// Console writer whose every write fails, like a closed stdout
    struct ClosedConsole;

    impl std::io::Write for ClosedConsole {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "console closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_console_write_failure_fails_only_the_writing_context() {
        let err = MemorySink::new();
        let mux = LineSafeMultiplexer::new(ClosedConsole, err.clone());
        let executor = FanOutExecutor::new(Arc::new(ProcessRunner::new()), mux);
        // 1 MiB is far beyond a pipe buffer; the child only exits if the pipe is drained.
        let script = r#"
            if [ "$TF_WORKSPACE" = loud ]; then
                head -c 1048576 /dev/zero | tr '\0' x
                echo
            fi
            echo "$TF_WORKSPACE done" >&2
        "#;

        let report = tokio::time::timeout(
            Duration::from_secs(20),
            executor.run_detailed(contexts(&["loud", "quiet"]), sh(script)),
        )
        .await
        .expect("child blocked on a full pipe");

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.succeeded(), 1);
        let aggregate = report.error.expect("loud failed");
        assert_eq!(aggregate.len(), 1);
        match aggregate.get("loud") {
            Some(ContextError::Output(msg)) => assert!(msg.contains("console closed")),
            other => panic!("Expected Output error for loud, got {other:?}"),
        }

        let lines: HashSet<String> = err.lines().into_iter().collect();
        assert!(lines.contains("loud: loud done"));
        assert!(lines.contains("quiet: quiet done"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processes_run_in_parallel() {
        let (executor, _, _) = process_executor();
        let names = ["p1", "p2", "p3", "p4"];

        let started = Instant::now();
        let err = executor.run(contexts(&names), sh("sleep 0.5")).await;
        let elapsed = started.elapsed();

        assert!(err.is_none());
        assert!(
            elapsed < Duration::from_millis(1500),
            "four 0.5s sleeps took {elapsed:?}"
        );
    }
}
