//! Structured cancellation for watcher tasks
//!
//! A [`Scope`] owns every task of one watcher. Killing the scope cancels all
//! of them at their next suspension point; [`Scope::wait`] returns once the
//! last one has exited. Any task that exits, cleanly or not, kills its scope,
//! and the first error recorded is the one every `wait()` caller observes.
//!
//! Scopes nest with [`Scope::add`]: the child is killed when the parent dies,
//! and a child that fails kills the parent.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFuture;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::Instrument;
use tracing::Span;

use crate::Error;
use crate::Result;

struct ScopeInner {
    token: CancellationToken,
    tracker: TaskTracker,
    /// First error wins
    err: Mutex<Option<Error>>,
    span: Span,
}

/// Cancellation tree shared by the tasks of one watcher
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new(span: Span) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                err: Mutex::new(None),
                span,
            }),
        }
    }

    /// Runs `task` under this scope.
    ///
    /// The task is dropped as soon as the scope dies. When it returns, the
    /// scope is killed with its error, if any.
    pub fn spawn<F>(
        &self,
        name: &'static str,
        task: F,
    ) where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = self.clone();
        let token = self.inner.token.clone();
        self.inner.tracker.spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Ok(()),
                    result = task => result,
                };
                match result {
                    Ok(()) => {
                        debug!(task = name, "Watcher task stopped");
                        scope.kill(None);
                    }
                    Err(e) => {
                        error!(task = name, error = %e, "Watcher task failed");
                        scope.kill(Some(e));
                    }
                }
            }
            .instrument(self.inner.span.clone()),
        );
    }

    /// Ties `child` to this scope: killing this scope kills and waits for
    /// the child, and a child error kills this scope.
    pub fn add(
        &self,
        child: Scope,
    ) {
        let scope = self.clone();
        let token = self.inner.token.clone();
        self.inner.tracker.spawn(
            async move {
                let result = tokio::select! {
                    _ = token.cancelled() => {
                        child.kill(None);
                        child.wait().await
                    }
                    result = child.wait() => result,
                };
                if let Err(e) = result {
                    scope.kill(Some(e));
                }
            }
            .instrument(self.inner.span.clone()),
        );
    }

    /// Starts tearing the scope down. `err` is recorded unless an earlier
    /// error already was.
    pub fn kill(
        &self,
        err: Option<Error>,
    ) {
        if let Some(err) = err {
            let mut slot = self.inner.err.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.inner.token.cancel();
    }

    /// Blocks until every task has exited and returns the terminal error.
    ///
    /// A scope killed without an error resolves to `Ok(())`.
    pub async fn wait(&self) -> Result<()> {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The error the scope is dying with, if any.
    pub fn err(&self) -> Option<Error> {
        self.inner.err.lock().clone()
    }

    pub fn is_dying(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the scope starts dying.
    pub fn dying(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Number of tasks still running.
    pub fn task_count(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl fmt::Debug for Scope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Scope")
            .field("dying", &self.is_dying())
            .field("tasks", &self.task_count())
            .field("err", &self.err())
            .finish()
    }
}
