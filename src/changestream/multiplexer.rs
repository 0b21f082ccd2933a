//! In-memory change source
//!
//! Fans committed change batches out to registered subscriptions. Each
//! subscription only receives the events that match its filter options, as
//! one batch per committed transaction, in commit order.
//!
//! # Architecture
//!
//! ```text
//! Writer:
//!   publish(batch) -> [publish lock] -> filter per subscription
//!                                              ↓
//!   send(filtered) to each subscription queue (bounded, dispatch timeout)
//!                                              ↓
//! Watcher task:
//!   Subscription::changes_mut().recv()
//! ```
//!
//! A subscription that keeps its queue full for longer than
//! `dispatch_timeout_ms` is evicted: it is removed from the registry and its
//! `done` token fires, so the owning watcher stops with
//! `Error::SubscriptionClosed` instead of stalling every other subscriber.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::matches_any;
use super::ChangeBatch;
use super::FilterOption;
use super::Subscription;
use super::WatchableDb;
use crate::Error;
use crate::Result;
use crate::WatchConfig;

/// Registered subscription state
struct SubscriptionEntry {
    opts: Vec<FilterOption>,
    sender: mpsc::Sender<ChangeBatch>,
    done: CancellationToken,
}

struct MultiplexerInner {
    /// Subscriptions keyed by id
    subscriptions: DashMap<u64, SubscriptionEntry>,

    /// Next subscription ID (monotonically increasing)
    next_id: AtomicU64,

    /// Cancelled when the source is torn down; parent of every `done` token
    closed: CancellationToken,

    /// Serializes publishers so batches reach subscribers in commit order
    publish_lock: Mutex<()>,

    config: WatchConfig,
}

impl MultiplexerInner {
    fn evict(
        &self,
        id: u64,
    ) {
        // Cancel before the sender drops so a receiver that sees its
        // channel close always observes `done` as well.
        if let Some(entry) = self.subscriptions.get(&id) {
            entry.done.cancel();
        }
        self.subscriptions.remove(&id);
    }
}

impl std::fmt::Debug for MultiplexerInner {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MultiplexerInner")
            .field("subscriptions", &self.subscriptions.len())
            .field("next_id", &self.next_id)
            .field("closed", &self.closed.is_cancelled())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// In-memory [`WatchableDb`] change source
///
/// # Example
///
/// ```ignore
/// let source = EventMultiplexer::new(WatchConfig::default())?;
/// let mut sub = source.subscribe(vec![FilterOption::namespace("unit", ChangeType::ALL)])?;
///
/// source.publish(vec![ChangeEvent::new(ChangeType::CREATE, "unit", "u/0")]).await?;
///
/// let batch = sub.changes_mut().recv().await;
/// ```
#[derive(Debug, Clone)]
pub struct EventMultiplexer {
    inner: Arc<MultiplexerInner>,
}

impl EventMultiplexer {
    /// Builds a source for `config`, which must pass
    /// [`WatchConfig::validate`].
    pub fn new(config: WatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MultiplexerInner {
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: CancellationToken::new(),
                publish_lock: Mutex::new(()),
                config,
            }),
        })
    }

    /// Delivers one committed transaction's changes.
    ///
    /// Returns the number of subscriptions the batch was delivered to.
    pub async fn publish(
        &self,
        batch: ChangeBatch,
    ) -> Result<usize> {
        if self.inner.closed.is_cancelled() {
            return Err(Error::SourceUnavailable("event multiplexer closed".into()));
        }

        let _guard = self.inner.publish_lock.lock().await;

        // Collect targets first so no registry guard is held across an await.
        let targets: Vec<(u64, mpsc::Sender<ChangeBatch>, ChangeBatch)> = self
            .inner
            .subscriptions
            .iter()
            .filter_map(|entry| {
                let filtered: ChangeBatch =
                    batch.iter().filter(|event| matches_any(&entry.opts, event)).cloned().collect();
                if filtered.is_empty() {
                    None
                } else {
                    Some((*entry.key(), entry.sender.clone(), filtered))
                }
            })
            .collect();

        let dispatch_timeout = self.inner.config.dispatch_timeout();
        let mut delivered = 0;
        for (id, sender, filtered) in targets {
            match timeout(dispatch_timeout, sender.send(filtered)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    // Receiver dropped; its guard removes the registration.
                    trace!(subscription_id = id, "Subscription receiver gone");
                }
                Err(_) => {
                    warn!(
                        subscription_id = id,
                        timeout_ms = self.inner.config.dispatch_timeout_ms,
                        "Subscription too slow, evicting"
                    );
                    self.inner.evict(id);
                }
            }
        }

        trace!(
            events = batch.len(),
            delivered = delivered,
            "Change batch published"
        );

        Ok(delivered)
    }

    /// Terminates a single subscription as if the source lost it.
    pub fn terminate(
        &self,
        subscription_id: u64,
    ) {
        self.inner.evict(subscription_id);
    }

    /// Tears the source down. Every live subscription reports `done`;
    /// later subscribe or publish calls fail.
    pub fn close(&self) {
        debug!(
            subscriptions = self.inner.subscriptions.len(),
            "Event multiplexer closing"
        );
        self.inner.closed.cancel();
        self.inner.subscriptions.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of live subscriptions.
    ///
    /// This is primarily for testing and monitoring purposes.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

impl WatchableDb for EventMultiplexer {
    fn subscribe(
        &self,
        opts: Vec<FilterOption>,
    ) -> Result<Subscription> {
        if self.inner.closed.is_cancelled() {
            return Err(Error::SourceUnavailable("event multiplexer closed".into()));
        }
        if opts.is_empty() {
            return Err(Error::Subscribe("at least one filter option is required".into()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.config.subscription_buffer_size);
        let done = self.inner.closed.child_token();

        trace!(
            subscription_id = id,
            opts = ?opts,
            "Subscription registered"
        );

        self.inner.subscriptions.insert(
            id,
            SubscriptionEntry {
                opts,
                sender,
                done: done.clone(),
            },
        );

        let inner: Weak<MultiplexerInner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, receiver, done, move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscriptions.remove(&id);
            }
        }))
    }
}
