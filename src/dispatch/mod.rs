//! Job dispatcher - runs shell commands and async functions as jobs.
//!
//! A job either runs on the caller's task (blocking) or is spawned into a
//! [`JobGroup`], the structured scope that owns it until [`JobGroup::join`].
//! Children that create their own groups must join them before finishing,
//! so joining a group is a barrier for its whole subtree.
//!
//! # Output handling
//!
//! | [`OutputMode`] | stdout            | stderr            |
//! |----------------|-------------------|-------------------|
//! | `Both`         | pipe → var → out  | pipe → var → err  |
//! | `Stdout`       | pipe → var → out  | null              |
//! | `Stderr`       | null              | pipe → var → err  |
//! | `Capture`      | pipe → var        | pipe → var        |
//! | `Inherit`      | inherited         | inherited         |
//!
//! Forwarded lines are prefixed with the job name while more than one job
//! is active.
//!
//! # Dry run
//!
//! With dry-run enabled, subprocesses are skipped unless the job is
//! `passive` (read-only commands whose output is needed, such as rule
//! generator scripts). Function jobs always run.

mod buffer;
mod group;
mod job;

pub use buffer::{ReportBuffer, ReportWriter};
pub use group::{Dispatched, JobGroup, JobHandle};
pub use job::{DispatchError, Job, JobFailure};

use crate::metrics::Metrics;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::Instrument;

/// Boxed future run by function jobs
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// How the standard streams of a subprocess are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Capture both streams and forward them
    #[default]
    Both,
    /// Capture and forward stdout, discard stderr
    Stdout,
    /// Capture and forward stderr, discard stdout
    Stderr,
    /// Capture both streams without forwarding
    Capture,
    /// No pipes: the child inherits our streams, nothing is captured
    Inherit,
}

impl OutputMode {
    fn forwards_stdout(self) -> bool {
        matches!(self, OutputMode::Both | OutputMode::Stdout)
    }

    fn forwards_stderr(self) -> bool {
        matches!(self, OutputMode::Both | OutputMode::Stderr)
    }

    fn stdio(self) -> (Stdio, Stdio) {
        match self {
            OutputMode::Both | OutputMode::Capture => (Stdio::piped(), Stdio::piped()),
            OutputMode::Stdout => (Stdio::piped(), Stdio::null()),
            OutputMode::Stderr => (Stdio::null(), Stdio::piped()),
            OutputMode::Inherit => (Stdio::inherit(), Stdio::inherit()),
        }
    }

    /// Apply `-q` levels: one level keeps only stderr, two silence forwarding
    fn quieted(self, quiet: u8) -> Self {
        match (quiet, self) {
            (0, mode) => mode,
            (_, OutputMode::Capture) => OutputMode::Capture,
            (1, OutputMode::Inherit) => OutputMode::Inherit,
            (1, _) => OutputMode::Stderr,
            _ => OutputMode::Capture,
        }
    }
}

/// Per-dispatch options
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Run on the caller's task instead of spawning into a group
    pub blocking: bool,
    pub output: OutputMode,
    /// Execute even in dry-run mode
    pub passive: bool,
    /// Job name; `job<id>` when unset
    pub name: Option<String>,
}

impl DispatchOptions {
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }

    pub fn background() -> Self {
        Self::default()
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// What a job executes
pub enum Task {
    /// Shell command line, run through `bash -c`
    Command(String),
    /// Async function with a description used in logs
    Function { description: String, future: JobFuture },
}

impl Task {
    pub fn function<F>(description: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Task::Function {
            description: description.into(),
            future: Box::pin(future),
        }
    }

    fn description(&self) -> &str {
        match self {
            Task::Command(cmd) => cmd,
            Task::Function { description, .. } => description,
        }
    }
}

impl From<&str> for Task {
    fn from(cmd: &str) -> Self {
        Task::Command(cmd.to_string())
    }
}

impl From<String> for Task {
    fn from(cmd: String) -> Self {
        Task::Command(cmd)
    }
}

/// Process-wide dispatch settings
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub dry_run: bool,
    /// Number of `-q` flags
    pub quiet: u8,
    /// Collect forwarded output here for the mail report
    pub report: Option<ReportBuffer>,
}

struct Inner {
    config: DispatcherConfig,
    metrics: Arc<Metrics>,
    next_id: AtomicUsize,
    active: AtomicUsize,
}

/// Cheap to clone handle; clones share the job counters.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Decrements the active job counter when a job ends, panics included
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                metrics,
                next_id: AtomicUsize::new(1),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.inner.config.dry_run
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Number of jobs currently executing
    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// A new, empty job scope
    pub fn group(&self) -> JobGroup {
        JobGroup::new(self.clone())
    }

    /// Dispatch `task` according to `options.blocking`.
    ///
    /// Blocking jobs run to completion here and fail synchronously;
    /// non-blocking jobs are registered under `scope` and surface their
    /// failures at [`JobGroup::join`].
    pub async fn dispatch(
        &self,
        scope: &mut JobGroup,
        task: impl Into<Task>,
        options: DispatchOptions,
    ) -> Result<Dispatched, DispatchError> {
        if options.blocking {
            self.run(task, options).await.map(Dispatched::Finished)
        } else {
            Ok(Dispatched::Spawned(scope.spawn(task, options)))
        }
    }

    /// Run `task` on the caller's task and wait for it.
    pub async fn run(
        &self,
        task: impl Into<Task>,
        options: DispatchOptions,
    ) -> Result<Job, DispatchError> {
        let job = self.execute(self.prepare(&options), task.into(), options).await;
        match job.failure.clone() {
            Some(failure) => Err(DispatchError::Job {
                failure,
                job: Box::new(job),
            }),
            None => Ok(job),
        }
    }

    /// Allocate id and name for a job about to be dispatched
    pub(crate) fn prepare(&self, options: &DispatchOptions) -> (usize, String) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let name = options.name.clone().unwrap_or_else(|| format!("job{}", id));
        (id, name)
    }

    /// Execute a task to completion, capturing any failure on the job
    pub(crate) async fn execute(
        &self,
        (id, name): (usize, String),
        task: Task,
        options: DispatchOptions,
    ) -> Job {
        let mut job = Job::new(id, name.clone(), task.description().to_string());
        let span = tracing::info_span!("job", name = %name);

        async {
            self.inner.active.fetch_add(1, Ordering::SeqCst);
            let _active = ActiveGuard(&self.inner.active);
            let start = Instant::now();

            let result = match task {
                Task::Command(cmd) => self.exec_command(&mut job, &cmd, &options).await,
                Task::Function { future, .. } => future
                    .await
                    .map_err(|e| JobFailure::Function(format!("{:#}", e))),
            };

            if let Err(failure) = result {
                if !options.blocking {
                    // blocking failures are reported by whoever handles them
                    tracing::error!("{}", failure);
                }
                job.failure = Some(failure);
            }

            self.inner
                .metrics
                .record_job(start.elapsed(), job.failure.is_some());
        }
        .instrument(span)
        .await;

        job
    }

    async fn exec_command(
        &self,
        job: &mut Job,
        cmd: &str,
        options: &DispatchOptions,
    ) -> Result<(), JobFailure> {
        tracing::debug!("{}", cmd);

        if self.inner.config.dry_run && !options.passive {
            tracing::debug!("Dry run, not executing: {}", cmd);
            job.skipped = true;
            return Ok(());
        }

        let output = options.output.quieted(self.inner.config.quiet);
        let (stdout_cfg, stderr_cfg) = output.stdio();

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(stdout_cfg)
            .stderr(stderr_cfg)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobFailure::Spawn {
                command: cmd.to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out_lines, err_lines) = tokio::join!(
            self.read_lines(stdout, &job.name, output.forwards_stdout(), Stream::Stdout),
            self.read_lines(stderr, &job.name, output.forwards_stderr(), Stream::Stderr),
        );
        job.stdout = out_lines;
        job.stderr = err_lines;

        let status = child.wait().await.map_err(|e| JobFailure::Spawn {
            command: cmd.to_string(),
            message: e.to_string(),
        })?;
        let code = status.code().unwrap_or(-1);
        job.code = Some(code);

        self.append_report(job, output);

        if code != 0 {
            return Err(JobFailure::ExitStatus {
                command: cmd.to_string(),
                code,
            });
        }
        Ok(())
    }

    /// Read a pipe line by line, forwarding each line if requested
    async fn read_lines<R>(
        &self,
        pipe: Option<R>,
        name: &str,
        forward: bool,
        stream: Stream,
    ) -> Vec<String>
    where
        R: AsyncRead + Unpin,
    {
        let Some(pipe) = pipe else {
            return Vec::new();
        };

        let mut reader = BufReader::new(pipe);
        let mut lines = Vec::new();
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if forward {
                        let prefix = self.line_prefix(name);
                        match stream {
                            Stream::Stdout => println!("{}{}", prefix, line),
                            Stream::Stderr => eprintln!("{}{}", prefix, line),
                        }
                    }
                    lines.push(line);
                }
                Err(e) => {
                    tracing::warn!("Failed to read job output: {}", e);
                    break;
                }
            }
        }
        lines
    }

    fn line_prefix(&self, name: &str) -> String {
        if self.active_jobs() > 1 {
            format!("{}: ", name)
        } else {
            String::new()
        }
    }

    fn append_report(&self, job: &Job, output: OutputMode) {
        let Some(report) = &self.inner.config.report else {
            return;
        };
        if self.inner.config.dry_run {
            return;
        }

        let prefix = self.line_prefix(&job.name);
        if output.forwards_stdout() && !job.stdout.is_empty() {
            report.append_lines(&prefix, &job.stdout);
        } else if output == OutputMode::Stderr {
            report.append_lines(&prefix, &job.stderr);
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(dry_run: bool) -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig {
                dry_run,
                ..DispatcherConfig::default()
            },
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_quiet_levels() {
        assert_eq!(OutputMode::Both.quieted(0), OutputMode::Both);
        assert_eq!(OutputMode::Both.quieted(1), OutputMode::Stderr);
        assert_eq!(OutputMode::Stdout.quieted(1), OutputMode::Stderr);
        assert_eq!(OutputMode::Capture.quieted(1), OutputMode::Capture);
        assert_eq!(OutputMode::Both.quieted(2), OutputMode::Capture);
        assert_eq!(OutputMode::Inherit.quieted(2), OutputMode::Capture);
    }

    #[tokio::test]
    async fn test_blocking_command_captures_output() {
        let d = dispatcher(false);
        let job = d
            .run(
                "echo out; echo err >&2",
                DispatchOptions::blocking().output(OutputMode::Capture),
            )
            .await
            .unwrap();

        assert_eq!(job.stdout, vec!["out"]);
        assert_eq!(job.stderr, vec!["err"]);
        assert_eq!(job.code, Some(0));
        assert!(job.succeeded());
    }

    #[tokio::test]
    async fn test_blocking_failure_is_synchronous() {
        let d = dispatcher(false);
        let err = d
            .run("exit 3", DispatchOptions::blocking().output(OutputMode::Capture))
            .await
            .unwrap_err();

        match err {
            DispatchError::Job { failure, job } => {
                assert_eq!(
                    failure,
                    JobFailure::ExitStatus {
                        command: "exit 3".into(),
                        code: 3
                    }
                );
                assert_eq!(job.code, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_skips_unless_passive() {
        let d = dispatcher(true);

        let skipped = d
            .run("echo hi", DispatchOptions::blocking().output(OutputMode::Capture))
            .await
            .unwrap();
        assert!(skipped.skipped);
        assert!(skipped.stdout.is_empty());
        assert_eq!(skipped.code, None);

        let ran = d
            .run(
                "echo hi",
                DispatchOptions::blocking()
                    .output(OutputMode::Capture)
                    .passive(),
            )
            .await
            .unwrap();
        assert_eq!(ran.stdout, vec!["hi"]);
    }

    #[tokio::test]
    async fn test_stdout_mode_discards_stderr() {
        let d = dispatcher(false);
        let job = d
            .run(
                "echo out; echo err >&2",
                DispatchOptions::blocking().output(OutputMode::Stdout),
            )
            .await
            .unwrap();
        assert_eq!(job.stdout, vec!["out"]);
        assert!(job.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_function_job_error_is_captured() {
        let d = dispatcher(false);
        let err = d
            .run(
                Task::function("broken", async { anyhow::bail!("boom") }),
                DispatchOptions::blocking(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_report_buffer_collects_forwarded_output() {
        let report = ReportBuffer::new();
        let d = Dispatcher::new(
            DispatcherConfig {
                report: Some(report.clone()),
                ..DispatcherConfig::default()
            },
            Arc::new(Metrics::new()),
        );

        d.run("echo mailed", DispatchOptions::blocking().output(OutputMode::Stdout))
            .await
            .unwrap();
        d.run("echo hidden", DispatchOptions::blocking().output(OutputMode::Capture))
            .await
            .unwrap();

        assert_eq!(report.contents(), "mailed\n");
    }
}
