//! Bounded worker pool running one external process per job descriptor.
//!
//! Each worker takes the next unstarted job (planning order), opens a fresh log file,
//! spawns the analysis executable with stdout and stderr redirected into it, waits for the
//! exit, and reports back. The caller sees `Started`/`Finished` events as they happen, so
//! completion order is whatever the processes produce.
//!
//! Children run in their own process group, so an interrupt at the terminal only sets the
//! cancel token; running jobs are then drained or killed according to [`CancelMode`].
//! No job is spawned once the token is observed.

use crate::concurrency::{bounded_pool, CancelToken};
use crate::plan::JobDescriptor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// What happens to running jobs once cancellation is requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Stop starting new jobs, let running ones finish.
    #[default]
    Drain,
    /// Stop starting new jobs and kill the running ones.
    Kill,
}

/// How a single job ended. Exit codes are recorded, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Exited { code: Option<i32> },
    /// Terminated by a signal it did not get from the pool (unix only).
    Signalled { signal: i32 },
    /// Terminated by the pool after cancellation in [`CancelMode::Kill`].
    Killed,
    SpawnFailed { error: String },
    WaitFailed { error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Exited { code: Some(0) })
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return JobOutcome::Signalled { signal };
            }
        }
        JobOutcome::Exited { code: status.code() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct JobResult {
    pub index: usize, // position in the planned job list
    pub job: JobDescriptor,
    pub outcome: JobOutcome,
    pub elapsed_secs: f64,
}

impl JobResult {
    pub fn log_path(&self) -> &std::path::Path {
        &self.job.log_path
    }
}

/// Lifecycle notifications delivered on the calling thread.
#[derive(Debug)]
pub enum PoolEvent<'a> {
    Started { index: usize, job: &'a JobDescriptor },
    Finished(&'a JobResult),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolReport {
    pub results: Vec<JobResult>, // in completion order
    pub not_started: usize,
    pub cancelled: bool,
}

impl PoolReport {
    pub fn failed(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

enum Message {
    Started(usize),
    Finished(JobResult),
}

#[derive(Clone, Debug)]
pub struct WorkerPool {
    workers: usize,
    mode: CancelMode,
    poll: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize, mode: CancelMode) -> Self {
        Self { workers: workers.max(1), mode, poll: Duration::from_millis(100) }
    }

    /// How often a running child is checked for a kill request.
    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.poll = every;
        self
    }

    /// Run every job, at most `workers` at a time. Returns once all admitted jobs have
    /// ended; jobs never admitted because of cancellation are counted in `not_started`.
    pub fn run<F>(&self, jobs: &[JobDescriptor], cancel: &CancelToken, mut on_event: F) -> Result<PoolReport>
    where
        F: FnMut(PoolEvent<'_>),
    {
        if jobs.is_empty() {
            return Ok(PoolReport::default());
        }
        let threads = self.workers.min(jobs.len());
        let pool = bounded_pool(threads, "job")?;
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<Message>();
        let mut results = Vec::with_capacity(jobs.len());
        let mut started = 0usize;

        pool.in_place_scope(|s| {
            for _ in 0..threads {
                let tx = tx.clone();
                let next = &next;
                let mode = self.mode;
                let poll = self.poll;
                s.spawn(move |_| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    if idx >= jobs.len() {
                        break;
                    }
                    // None: the token was set before the child could be spawned.
                    let Some(result) = run_job(idx, &jobs[idx], cancel, mode, poll, &tx) else {
                        break;
                    };
                    if tx.send(Message::Finished(result)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for msg in rx {
                match msg {
                    Message::Started(idx) => {
                        started += 1;
                        on_event(PoolEvent::Started { index: idx, job: &jobs[idx] });
                    }
                    Message::Finished(result) => {
                        on_event(PoolEvent::Finished(&result));
                        results.push(result);
                    }
                }
            }
        });

        let cancelled = cancel.is_cancelled();
        let not_started = jobs.len() - started;
        if cancelled {
            tracing::warn!(started, not_started, "job pool stopped after cancellation");
        }
        Ok(PoolReport { results, not_started, cancelled })
    }
}

/// Spawn, announce and wait for one job. Returns `None` if cancellation was observed
/// before a child process existed; such a job counts as not started.
fn run_job(
    index: usize,
    job: &JobDescriptor,
    cancel: &CancelToken,
    mode: CancelMode,
    poll: Duration,
    tx: &mpsc::Sender<Message>,
) -> Option<JobResult> {
    let t0 = Instant::now();
    let spawned = match spawn(job, cancel) {
        Ok(None) => return None,
        Ok(Some(child)) => Ok(child),
        Err(e) => Err(e),
    };
    let _ = tx.send(Message::Started(index));
    tracing::debug!(job=%job.label, start=job.start, end=job.end, offset=job.offset, "started job");

    let outcome = match spawned {
        Ok(child) => wait(child, job, cancel, mode, poll).unwrap_or_else(|e| {
            tracing::warn!(job=%job.label, error=%format!("{e:#}"), "lost track of job");
            JobOutcome::WaitFailed { error: format!("{e:#}") }
        }),
        Err(e) => {
            tracing::warn!(job=%job.label, error=%format!("{e:#}"), "job could not be started");
            JobOutcome::SpawnFailed { error: format!("{e:#}") }
        }
    };
    Some(JobResult { index, job: job.clone(), outcome, elapsed_secs: t0.elapsed().as_secs_f64() })
}

fn spawn(job: &JobDescriptor, cancel: &CancelToken) -> Result<Option<Child>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }
    let log = File::create(&job.log_path)
        .with_context(|| format!("create log {}", job.log_path.display()))?;
    let log_err = log.try_clone().with_context(|| format!("clone log handle {}", job.log_path.display()))?;

    let mut cmd = Command::new(&job.executable);
    cmd.args(job.args())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    detach_from_terminal_group(&mut cmd);

    if cancel.is_cancelled() {
        drop(cmd);
        let _ = fs::remove_file(&job.log_path);
        return Ok(None);
    }
    let child = cmd.spawn().with_context(|| format!("spawn {}", job.executable.display()))?;
    Ok(Some(child))
}

fn wait(mut child: Child, job: &JobDescriptor, cancel: &CancelToken, mode: CancelMode, poll: Duration) -> Result<JobOutcome> {
    if mode == CancelMode::Drain {
        let status = child.wait().with_context(|| format!("wait for {}", job.label))?;
        return Ok(JobOutcome::from_status(status));
    }

    loop {
        if let Some(status) = child.try_wait().with_context(|| format!("poll {}", job.label))? {
            return Ok(JobOutcome::from_status(status));
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(job=%job.label, "killed running job");
            return Ok(JobOutcome::Killed);
        }
        thread::sleep(poll);
    }
}

/// Put the child in its own process group so a terminal Ctrl-C reaches only us. Whether
/// running children stop is then decided by the [`CancelMode`].
pub(crate) fn detach_from_terminal_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}
