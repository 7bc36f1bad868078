//! Acceptor and worker thread groups
//!
//! Each group is its own multi-threaded tokio runtime. The acceptor group
//! has exactly one thread and only accepts; every accepted connection is
//! handed to the worker group and tracked there until it finishes.

use crate::config::RuntimeHook;
use courier_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Thread name prefix of the acceptor group
pub const ACCEPTOR_THREAD_NAME: &str = "courier-acceptor";
/// Thread name prefix of the worker group
pub const WORKER_THREAD_NAME: &str = "courier-worker";

// Upper bound for the runtime teardown once tasks were told to stop.
const FORCE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runtimes, cancellation tokens and the connection tracker of one run
pub(crate) struct EventLoopGroups {
    acceptor: Runtime,
    worker: Runtime,
    accept_token: CancellationToken,
    worker_token: CancellationToken,
    tracker: TaskTracker,
    accept_task: Option<JoinHandle<()>>,
}

impl EventLoopGroups {
    /// Build both groups; `worker_threads = None` uses the runtime default
    ///
    /// `worker_runtime` sees the worker builder last and may override any
    /// setting, including the thread count and name.
    pub(crate) fn build(worker_threads: Option<usize>, worker_runtime: Option<&RuntimeHook>) -> Result<Self> {
        let acceptor = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(ACCEPTOR_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(Error::Io)?;

        let mut worker = Builder::new_multi_thread();
        worker.thread_name(WORKER_THREAD_NAME).enable_all();
        if let Some(threads) = worker_threads {
            worker.worker_threads(threads);
        }
        if let Some(hook) = worker_runtime {
            (**hook)(&mut worker);
        }
        let worker = worker.build().map_err(Error::Io)?;

        Ok(Self {
            acceptor,
            worker,
            accept_token: CancellationToken::new(),
            worker_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: None,
        })
    }

    pub(crate) fn acceptor_handle(&self) -> Handle {
        self.acceptor.handle().clone()
    }

    pub(crate) fn worker_handle(&self) -> Handle {
        self.worker.handle().clone()
    }

    pub(crate) fn accept_token(&self) -> CancellationToken {
        self.accept_token.clone()
    }

    pub(crate) fn worker_token(&self) -> CancellationToken {
        self.worker_token.clone()
    }

    pub(crate) fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Run the accept loop on the acceptor group
    pub(crate) fn spawn_acceptor<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.accept_task = Some(self.acceptor.spawn(task));
    }

    /// Shut down the worker group, then the acceptor group
    ///
    /// In-flight connections get `grace` to wind down before their runtime is
    /// forced down. Must not be called from inside either runtime.
    pub(crate) fn shutdown(self, grace: Duration) {
        let Self {
            acceptor,
            worker,
            accept_token,
            worker_token,
            tracker,
            accept_task,
        } = self;

        worker_token.cancel();
        tracker.close();
        let drained = worker.block_on(async { tokio::time::timeout(grace, tracker.wait()).await.is_ok() });
        if !drained {
            crate::log_warn!(
                "{} connection(s) still running after {:?}, forcing worker shutdown",
                tracker.len(),
                grace
            );
        }
        worker.shutdown_timeout(FORCE_SHUTDOWN_TIMEOUT);
        crate::log_debug!("worker group stopped");

        accept_token.cancel();
        if let Some(task) = accept_task {
            let finished = acceptor.block_on(async { tokio::time::timeout(grace, task).await.is_ok() });
            if !finished {
                crate::log_warn!("accept loop did not exit within {:?}", grace);
            }
        }
        acceptor.shutdown_timeout(FORCE_SHUTDOWN_TIMEOUT);
        crate::log_debug!("acceptor group stopped");
    }
}

impl std::fmt::Debug for EventLoopGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroups")
            .field("connections", &self.tracker.len())
            .field("accepting", &!self.accept_token.is_cancelled())
            .finish()
    }
}
