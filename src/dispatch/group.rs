use super::{DispatchError, DispatchOptions, Dispatcher, Job, JobFailure, Task};
use tokio::task::JoinHandle;

/// Identifies a job spawned into a [`JobGroup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: usize,
    pub name: String,
}

/// Result of [`Dispatcher::dispatch`]
#[derive(Debug)]
pub enum Dispatched {
    /// Blocking job, already complete
    Finished(Job),
    /// Non-blocking job, complete once its group is joined
    Spawned(JobHandle),
}

/// A scope owning non-blocking jobs.
///
/// Every job spawned here stays registered until [`join`](Self::join).
/// Dropping a group with pending jobs aborts them.
pub struct JobGroup {
    dispatcher: Dispatcher,
    pending: Vec<(JobHandle, JoinHandle<Job>)>,
}

impl JobGroup {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            pending: Vec::new(),
        }
    }

    /// Spawn `task` on the runtime and register it under this group
    pub fn spawn(&mut self, task: impl Into<Task>, mut options: DispatchOptions) -> JobHandle {
        options.blocking = false;
        let (id, name) = self.dispatcher.prepare(&options);
        let handle = JobHandle {
            id,
            name: name.clone(),
        };

        let dispatcher = self.dispatcher.clone();
        let task = task.into();
        let join = tokio::spawn(async move { dispatcher.execute((id, name), task, options).await });

        self.pending.push((handle.clone(), join));
        handle
    }

    /// Number of jobs not yet joined
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every registered job.
    ///
    /// Returns the finished jobs in dispatch order, or
    /// [`DispatchError::ChildFailures`] carrying all of them when at least
    /// one captured a failure. The group is empty afterwards either way.
    pub async fn join(&mut self) -> Result<Vec<Job>, DispatchError> {
        let mut jobs = Vec::with_capacity(self.pending.len());

        for (handle, join) in self.pending.drain(..) {
            match join.await {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::error!("Job {} did not complete: {}", handle.name, e);
                    let mut job = Job::new(handle.id, handle.name, String::new());
                    job.failure = Some(JobFailure::Panicked(e.to_string()));
                    jobs.push(job);
                }
            }
        }

        let failed = jobs.iter().filter(|job| !job.succeeded()).count();
        if failed > 0 {
            return Err(DispatchError::ChildFailures { failed, jobs });
        }
        Ok(jobs)
    }
}

impl Drop for JobGroup {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::warn!("Aborting {} un-joined job(s)", self.pending.len());
        for (_, join) in self.pending.drain(..) {
            join.abort();
        }
    }
}
