//! Scoped background tasks.
//!
//! A [`ScopedTask`] owns a spawned future together with the token that stops
//! it. Stopping is synchronous from the caller's point of view: once
//! [`ScopedTask::cancel`] returns, the task will not make further progress
//! past its current suspension point, and any future it was awaiting (an HTTP
//! request, a timer) is dropped. Dropping the handle cancels the task, so a
//! timer can never outlive the scope that acquired it.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a background task that is cancelled when the handle is dropped.
#[derive(Debug)]
pub struct ScopedTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScopedTask {
    /// Spawns `body` on the current tokio runtime.
    ///
    /// `body` receives a clone of the task's cancellation token, for bodies
    /// that want to hand it to nested work. The body is raced against the
    /// token regardless, so it does not need to observe it.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(name, CancellationToken::new(), body)
    }

    /// Spawns `body` as a child of `parent`: cancelling `parent` cancels
    /// this task at the same moment, without waiting for the parent's own
    /// future to be dropped.
    pub fn spawn_child<F, Fut>(name: &'static str, parent: &CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(name, parent.child_token(), body)
    }

    fn spawn_with<F, Fut>(name: &'static str, cancel: CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = body(cancel.clone());
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(task = name, "task cancelled");
                }
                () = fut => {
                    debug!(task = name, "task finished");
                }
            }
        });

        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    /// Stops the task. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(task = self.name, "cancelling task");
            self.cancel.cancel();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called, the
    /// handle has been dropped, or a parent token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the task to stop, either by finishing or by cancellation.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "task failed to join");
            }
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
