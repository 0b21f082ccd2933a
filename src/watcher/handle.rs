use std::fmt;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::stream::BoxStream;
use futures::Stream;
use futures::StreamExt;

use super::Changes;
use super::Scope;
use crate::Error;
use crate::Result;

/// A running watcher emitting values of type `T`
///
/// Each value on [`Watcher::changes`] stands for one or more coalesced
/// changes; consumers must not assume one value per underlying row change.
/// The first value is always the initial state (or an initial pulse for
/// notify watchers).
///
/// A watcher cannot be restarted. Once it stops, build a new one.
pub struct Watcher<T> {
    changes: Changes<T>,
    scope: Scope,
}

/// Emits `()` whenever something it watches changed
pub type NotifyWatcher = Watcher<()>;

/// Emits the identifiers that changed since the last value was read
pub type StringsWatcher = Watcher<Vec<String>>;

impl<T> Watcher<T> {
    pub(crate) fn new(
        changes: Changes<T>,
        scope: Scope,
    ) -> Self {
        Self { changes, scope }
    }

    pub(crate) fn into_parts(self) -> (Changes<T>, Scope) {
        (self.changes, self.scope)
    }

    pub fn changes(&mut self) -> &mut Changes<T> {
        &mut self.changes
    }

    /// Next value, or `None` once the watcher has stopped.
    pub async fn next(&mut self) -> Option<T> {
        self.changes.recv().await
    }

    pub fn kill(&self) {
        self.scope.kill(None);
    }

    /// Blocks until the watcher has fully stopped and returns the terminal
    /// error. A watcher stopped through [`Watcher::kill`] returns `Ok(())`.
    pub async fn wait(&self) -> Result<()> {
        self.scope.wait().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.kill();
        self.wait().await
    }

    /// Error the watcher is dying with, if any.
    pub fn err(&self) -> Option<Error> {
        self.scope.err()
    }

    pub fn is_dying(&self) -> bool {
        self.scope.is_dying()
    }

    pub fn into_stream(self) -> WatcherStream<T>
    where
        T: Send + 'static,
    {
        let inner = futures::stream::unfold(self.changes, |mut changes| async move {
            changes.recv().await.map(|value| (value, changes))
        })
        .boxed();
        WatcherStream {
            inner,
            scope: self.scope,
        }
    }
}

impl<T> fmt::Debug for Watcher<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Watcher").field("scope", &self.scope).finish()
    }
}

/// [`Stream`] view of a [`Watcher`] for consumers working with combinators
pub struct WatcherStream<T> {
    inner: BoxStream<'static, T>,
    scope: Scope,
}

impl<T> WatcherStream<T> {
    pub fn kill(&self) {
        self.scope.kill(None);
    }

    pub async fn wait(&self) -> Result<()> {
        self.scope.wait().await
    }
}

impl<T> Stream for WatcherStream<T> {
    type Item = T;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<T>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}
