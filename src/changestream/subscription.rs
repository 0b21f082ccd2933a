use std::fmt;

#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::ChangeBatch;
use super::FilterOption;
use crate::Result;

/// A store whose committed changes can be observed.
///
/// The same handle is passed to initial queries and mappers, which use it as
/// their transaction runner.
#[cfg_attr(test, automock)]
pub trait WatchableDb: Send + Sync + 'static {
    /// Registers a subscription scoped by `opts`. A batch is delivered for
    /// a transaction when at least one of its events matches any option.
    fn subscribe(
        &self,
        opts: Vec<FilterOption>,
    ) -> Result<Subscription>;
}

type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// Live registration with a change source
///
/// Batches arrive on [`Subscription::changes_mut`] in commit order. The
/// source signals termination through [`Subscription::done`]. Dropping the
/// subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    changes: mpsc::Receiver<ChangeBatch>,
    done: CancellationToken,
    unsubscribe: Option<Unsubscribe>,
    // Holds the sending half of a no-op subscription so its channel never closes.
    _keepalive: Option<mpsc::Sender<ChangeBatch>>,
}

impl Subscription {
    /// Builds a subscription for a change source implementation.
    ///
    /// `on_unsubscribe` runs exactly once, on explicit unsubscribe or drop.
    pub fn new<F>(
        id: u64,
        changes: mpsc::Receiver<ChangeBatch>,
        done: CancellationToken,
        on_unsubscribe: F,
    ) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            changes,
            done,
            unsubscribe: Some(Box::new(on_unsubscribe)),
            _keepalive: None,
        }
    }

    /// A subscription whose channel never fires and whose `done` never
    /// fires.
    pub fn noop() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            id: 0,
            changes: rx,
            done: CancellationToken::new(),
            unsubscribe: None,
            _keepalive: Some(tx),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_noop(&self) -> bool {
        self._keepalive.is_some()
    }

    pub fn changes_mut(&mut self) -> &mut mpsc::Receiver<ChangeBatch> {
        &mut self.changes
    }

    /// Token cancelled by the source once it has terminated this
    /// subscription.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            trace!(subscription_id = self.id, "Subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("noop", &self.is_noop())
            .field("done", &self.done.is_cancelled())
            .finish_non_exhaustive()
    }
}
