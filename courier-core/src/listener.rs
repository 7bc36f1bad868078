//! Completion listeners
//!
//! Every asynchronous lifecycle operation takes an optional [`Listener`] and
//! reports exactly one outcome to it, exactly once. [`completion`] turns the
//! callback pair into a value that can be waited on.

use crate::error::{Cause, Error};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::oneshot;

/// Two-outcome callback for lifecycle operations
///
/// `T` is the success payload; servers report their bound port.
pub trait Listener<T = u16>: Send + Sync {
    /// Called once when the operation succeeded
    fn on_success(&self, value: T);

    /// Called once when the operation failed
    fn on_failure(&self, cause: Cause);
}

/// Report success to an optional listener
pub fn notify_success<T>(listener: Option<&dyn Listener<T>>, value: T) {
    if let Some(listener) = listener {
        listener.on_success(value);
    }
}

/// Report failure to an optional listener
pub fn notify_failure<T>(listener: Option<&dyn Listener<T>>, cause: Cause) {
    if let Some(listener) = listener {
        listener.on_failure(cause);
    }
}

/// Listener built from a pair of closures
pub struct FnListener<S, F> {
    success: S,
    failure: F,
}

impl<S, F> fmt::Debug for FnListener<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

impl<T, S, F> Listener<T> for FnListener<S, F>
where
    S: Fn(T) + Send + Sync,
    F: Fn(Cause) + Send + Sync,
{
    fn on_success(&self, value: T) {
        (self.success)(value)
    }

    fn on_failure(&self, cause: Cause) {
        (self.failure)(cause)
    }
}

/// Create a listener from success and failure closures
pub fn from_fn<S, F>(success: S, failure: F) -> FnListener<S, F> {
    FnListener { success, failure }
}

/// Listener half of a completion channel
///
/// Only the first outcome is delivered; later calls are ignored, which keeps
/// the exactly-once contract even if a caller misbehaves.
pub struct Completion<T = u16> {
    tx: Mutex<Option<oneshot::Sender<Result<T, Cause>>>>,
}

/// Receiving half of a completion channel
pub struct CompletionReceiver<T = u16> {
    rx: oneshot::Receiver<Result<T, Cause>>,
}

/// Create a completion channel
pub fn completion<T>() -> (Completion<T>, CompletionReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            tx: Mutex::new(Some(tx)),
        },
        CompletionReceiver { rx },
    )
}

impl<T> Completion<T> {
    fn complete(&self, outcome: Result<T, Cause>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    /// Whether an outcome has already been delivered
    pub fn is_completed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl<T: Send> Listener<T> for Completion<T> {
    fn on_success(&self, value: T) {
        self.complete(Ok(value));
    }

    fn on_failure(&self, cause: Cause) {
        self.complete(Err(cause));
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl<T> CompletionReceiver<T> {
    /// Block the current thread until the outcome arrives
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T, Cause> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(abandoned()))
    }

    /// Wait for the outcome asynchronously
    pub async fn recv(self) -> Result<T, Cause> {
        self.rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    /// Take the outcome if it has already arrived
    pub fn try_recv(&mut self) -> Option<Result<T, Cause>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(abandoned())),
        }
    }
}

impl<T> fmt::Debug for CompletionReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionReceiver").finish_non_exhaustive()
    }
}

fn abandoned() -> Cause {
    Cause::new(Error::Other(
        "listener dropped without completing".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_completion_delivers_first_outcome_only() {
        let (listener, rx) = completion::<u16>();
        listener.on_success(8080);
        listener.on_failure(Arc::new(Error::from(LifecycleError::AlreadyShutdown)));

        assert!(listener.is_completed());
        assert_eq!(rx.wait().unwrap(), 8080);
    }

    #[test]
    fn test_dropped_completion_reports_failure() {
        let (listener, rx) = completion::<u16>();
        drop(listener);
        assert!(rx.wait().is_err());
    }

    #[test]
    fn test_try_recv_before_and_after() {
        let (listener, mut rx) = completion::<u16>();
        assert!(rx.try_recv().is_none());
        listener.on_failure(Arc::new(Error::Closed));
        assert!(matches!(rx.try_recv(), Some(Err(_))));
    }

    #[test]
    fn test_notify_none_is_noop() {
        notify_success::<u16>(None, 1);
        notify_failure::<u16>(None, Arc::new(Error::Closed));
    }

    #[test]
    fn test_fn_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let listener = {
            let hits = hits.clone();
            let failures = failures.clone();
            from_fn(
                move |port: u16| {
                    assert_eq!(port, 9000);
                    hits.fetch_add(1, Ordering::SeqCst);
                },
                move |_: Cause| {
                    failures.fetch_add(1, Ordering::SeqCst);
                },
            )
        };

        notify_success(Some(&listener as &dyn Listener), 9000);
        notify_failure(Some(&listener as &dyn Listener), Arc::new(Error::Closed));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_recv_outside_runtime() {
        let (listener, rx) = completion::<u16>();
        listener.on_success(7);
        assert_eq!(tokio_test::block_on(rx.recv()).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_completion_async_recv() {
        let (listener, rx) = completion::<()>();
        tokio::spawn(async move { listener.on_success(()) });
        assert!(rx.recv().await.is_ok());
    }
}
