use thiserror::Error;

/// One dispatched unit of work and everything it produced.
#[derive(Debug, Clone, Default)]
pub struct Job {
    /// Dispatcher-wide sequence number
    pub id: usize,

    /// Prefix used for forwarded output and log spans
    pub name: String,

    /// Shell command line, or a description for function jobs
    pub command: String,

    /// Captured standard output lines (empty for `Inherit` and dry runs)
    pub stdout: Vec<String>,

    /// Captured standard error lines
    pub stderr: Vec<String>,

    /// Exit code of the subprocess; `None` when nothing was executed
    pub code: Option<i32>,

    /// Failure captured while running the job
    pub failure: Option<JobFailure>,

    /// Set when dry-run suppressed execution
    pub skipped: bool,
}

impl Job {
    pub(crate) fn new(id: usize, name: String, command: String) -> Self {
        Self {
            id,
            name,
            command,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Why a single job failed. Stored on the [`Job`] so that failures of
/// non-blocking jobs can be inspected after `join`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("retcode {code} when executing \"{command}\"")]
    ExitStatus { command: String, code: i32 },

    #[error("failed to start \"{command}\": {message}")]
    Spawn { command: String, message: String },

    #[error("{0}")]
    Function(String),

    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced to callers of the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A blocking job failed; carries the finished job for inspection
    #[error("{}: {}", .job.name, .failure)]
    Job { failure: JobFailure, job: Box<Job> },

    /// `join` found failed children; every finished job is kept, siblings
    /// that succeeded included
    #[error("unhandled failure in {failed} of {} child job(s)", .jobs.len())]
    ChildFailures { failed: usize, jobs: Vec<Job> },
}

impl DispatchError {
    /// Jobs carried by the error, in dispatch order
    pub fn jobs(&self) -> &[Job] {
        match self {
            DispatchError::Job { job, .. } => std::slice::from_ref(job.as_ref()),
            DispatchError::ChildFailures { jobs, .. } => jobs,
        }
    }

    pub fn into_jobs(self) -> Vec<Job> {
        match self {
            DispatchError::Job { job, .. } => vec![*job],
            DispatchError::ChildFailures { jobs, .. } => jobs,
        }
    }
}
