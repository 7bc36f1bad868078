//! Bootstrap job chain
//!
//! Jobs run one after another. Each job receives a [`Next`] handle and must
//! eventually call [`Next::proceed`] or [`Next::abort`], possibly from a
//! different thread. The chain never retries a job.

use crate::error::{BootError, Result};
use courier_core::listener::Listener;
use courier_core::Cause;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::fmt;

/// One step of the boot sequence
pub trait BootJob: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start the job; signal completion through `next`
    fn run(&mut self, next: Next);
}

enum Signal {
    Proceed,
    Abort(BootError),
}

/// Completion handle given to a running job
///
/// Clones share the same slot; the chain acts on the first signal only.
#[derive(Clone)]
pub struct Next {
    job: String,
    tx: Sender<Signal>,
}

impl Next {
    fn new(job: &str) -> (Self, Receiver<Signal>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                job: job.to_string(),
                tx,
            },
            rx,
        )
    }

    /// Name of the job this handle belongs to
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Continue with the next job
    pub fn proceed(&self) {
        let _ = self.tx.try_send(Signal::Proceed);
    }

    /// Stop the chain with `error`
    pub fn abort(&self, error: BootError) {
        let _ = self.tx.try_send(Signal::Abort(error));
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("job", &self.job).finish()
    }
}

/// Proceeds on success, aborts with the job name on failure
impl<T> Listener<T> for Next {
    fn on_success(&self, _value: T) {
        self.proceed();
    }

    fn on_failure(&self, cause: Cause) {
        self.abort(BootError::job(format!("boot job `{}` failed", self.job), cause));
    }
}

/// Ordered list of boot jobs
#[derive(Default)]
pub struct BootChain {
    jobs: Vec<Box<dyn BootJob>>,
}

impl BootChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job
    pub fn then<J: BootJob + 'static>(mut self, job: J) -> Self {
        self.jobs.push(Box::new(job));
        self
    }

    /// Job names in run order
    pub fn names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name()).collect()
    }

    /// Run every job in order, blocking until the chain finishes or aborts
    pub fn run(self) -> Result<()> {
        for mut job in self.jobs {
            let name = job.name().to_string();
            let (next, signal) = Next::new(&name);

            tracing::info!(job = %name, "running boot job");
            job.run(next);

            match signal.recv() {
                Ok(Signal::Proceed) => tracing::debug!(job = %name, "boot job done"),
                Ok(Signal::Abort(error)) => {
                    tracing::error!(job = %name, error = %error, "boot job aborted");
                    return Err(error);
                }
                Err(_) => {
                    tracing::error!(job = %name, "boot job dropped its completion handle");
                    return Err(BootError::Interrupted { job: name });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BootChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootChain").field("jobs", &self.names()).finish()
    }
}
