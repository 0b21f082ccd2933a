//! BaseWatcher: the subscription plumbing shared by every watcher variant
//!
//! A watcher task only ever reads upstream. Each mapped batch is put into
//! the watcher's mailbox, where it merges with whatever the consumer has not
//! read yet:
//!
//! ```text
//!  subscription ──▶ mapper ──▶ from_changes ──▶ mailbox (merge if unread) ──▶ Changes
//! ```
//!
//! A slow consumer makes batches coalesce instead of queueing or blocking
//! the change source. The initial value is handed out on its own, before
//! any live batch.

use std::sync::Arc;

use tracing::debug;
use tracing::trace;
use tracing::warn;
use tracing::Span;

use super::mailbox::mailbox;
use super::mailbox::MailboxSender;
use super::Mapper;
use super::Scope;
use super::Watcher;
use crate::ChangeBatch;
use crate::Error;
use crate::FilterOption;
use crate::Result;
use crate::Subscription;
use crate::WatchableDb;

/// Value a watcher accumulates between two dispatches
pub(crate) trait Payload: Send + Sized + 'static {
    /// Payload for a mapped batch, `None` when nothing is left to report
    fn from_changes(changes: ChangeBatch) -> Option<Self>;

    fn merge(
        &mut self,
        incoming: Self,
    );

    fn merged(
        mut self,
        incoming: Self,
    ) -> Self {
        self.merge(incoming);
        self
    }
}

/// Drops repeated identifiers, keeping first occurrences in order.
pub(crate) fn dedup_ids(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

impl Payload for () {
    fn from_changes(changes: ChangeBatch) -> Option<Self> {
        (!changes.is_empty()).then_some(())
    }

    fn merge(
        &mut self,
        _incoming: Self,
    ) {
    }
}

impl Payload for Vec<String> {
    fn from_changes(changes: ChangeBatch) -> Option<Self> {
        let ids = dedup_ids(changes.into_iter().map(|change| change.into_changed()));
        (!ids.is_empty()).then_some(ids)
    }

    fn merge(
        &mut self,
        incoming: Self,
    ) {
        for id in incoming {
            if !self.contains(&id) {
                self.push(id);
            }
        }
    }
}

/// Binds one subscription to the change source and owns the scope every
/// watcher task runs in.
pub struct BaseWatcher<D: WatchableDb> {
    db: Arc<D>,
    scope: Scope,
}

impl<D: WatchableDb> BaseWatcher<D> {
    pub fn new(
        db: Arc<D>,
        span: Span,
    ) -> Self {
        Self {
            db,
            scope: Scope::new(span),
        }
    }

    pub fn db(&self) -> Arc<D> {
        self.db.clone()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Subscribes to the change source.
    ///
    /// A source that does not support the watch yields a subscription that
    /// never fires; every other failure is returned.
    pub fn subscribe(
        &self,
        opts: Vec<FilterOption>,
    ) -> Result<Subscription> {
        match self.db.subscribe(opts) {
            Ok(subscription) => {
                debug!(subscription_id = subscription.id(), "Watcher subscribed");
                Ok(subscription)
            }
            Err(Error::WatchUnsupported(reason)) => {
                warn!(reason = %reason, "Watch not supported by change source, watcher will never fire");
                Ok(Subscription::noop())
            }
            Err(e) => Err(e),
        }
    }

    /// Spawns the watcher loop and hands back its consumer side.
    ///
    /// `initial` is the first value delivered, on its own.
    pub(crate) fn run<P, M>(
        self,
        subscription: Subscription,
        initial: P,
        mapper: M,
    ) -> Watcher<P>
    where
        P: Payload,
        M: Mapper<D>,
    {
        let (out, changes) = mailbox(Some(initial));
        self.scope.spawn("watcher_loop", watch_loop(self.db, subscription, mapper, out));
        Watcher::new(changes, self.scope)
    }
}

async fn watch_loop<D, P, M>(
    db: Arc<D>,
    mut subscription: Subscription,
    mut mapper: M,
    out: MailboxSender<P>,
) -> Result<()>
where
    D: WatchableDb,
    P: Payload,
    M: Mapper<D>,
{
    let done = subscription.done();

    loop {
        tokio::select! {
            _ = done.cancelled() => {
                return Err(Error::SubscriptionClosed);
            }
            batch = subscription.changes_mut().recv() => {
                let Some(batch) = batch else {
                    // The source cancels `done` before dropping a terminated
                    // subscription's channel.
                    if done.is_cancelled() {
                        return Err(Error::SubscriptionClosed);
                    }
                    debug!(subscription_id = subscription.id(), "Subscription channel closed");
                    return Ok(());
                };
                if batch.is_empty() {
                    continue;
                }

                let received = batch.len();
                let mapped = mapper.map(db.clone(), batch).await?;
                let Some(incoming) = P::from_changes(mapped) else {
                    trace!(received, "Batch filtered out");
                    continue;
                };
                out.put(incoming, P::merged);
            }
            _ = out.closed() => {
                debug!("Watcher consumer gone");
                return Ok(());
            }
        }
    }
}
