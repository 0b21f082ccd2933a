//! Single-slot mailbox between a watcher task and its consumer
//!
//! The producer never waits on the consumer: a value put while the previous
//! one is still unread is merged into it. The consumer therefore always reads
//! everything that happened since its last read, as one value.
//!
//! An optional initial value sits in its own slot and is handed out first,
//! alone, before anything merged afterwards.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Slots<T> {
    initial: Option<T>,
    latest: Option<T>,
}

struct Shared<T> {
    slots: Mutex<Slots<T>>,
    ready: Notify,
    sender_gone: CancellationToken,
    receiver_gone: CancellationToken,
}

pub(crate) fn mailbox<T>(initial: Option<T>) -> (MailboxSender<T>, Changes<T>) {
    let shared = Arc::new(Shared {
        slots: Mutex::new(Slots {
            initial,
            latest: None,
        }),
        ready: Notify::new(),
        sender_gone: CancellationToken::new(),
        receiver_gone: CancellationToken::new(),
    });
    (
        MailboxSender {
            shared: shared.clone(),
        },
        Changes { shared },
    )
}

pub(crate) struct MailboxSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MailboxSender<T> {
    /// Stores `value`, merging it into an unread one with `merge(unread, value)`.
    pub(crate) fn put<F>(
        &self,
        value: T,
        merge: F,
    ) where
        F: FnOnce(T, T) -> T,
    {
        {
            let mut slots = self.shared.slots.lock();
            slots.latest = Some(match slots.latest.take() {
                Some(unread) => merge(unread, value),
                None => value,
            });
        }
        self.shared.ready.notify_one();
    }

    /// Resolves once the consumer side has been dropped.
    pub(crate) async fn closed(&self) {
        self.shared.receiver_gone.cancelled().await
    }
}

impl<T> Drop for MailboxSender<T> {
    fn drop(&mut self) {
        self.shared.sender_gone.cancel();
    }
}

/// Consumer side of a watcher: yields coalesced values until the watcher
/// stops.
pub struct Changes<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Changes<T> {
    /// Next value, or `None` once the watcher stopped and nothing is left.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            if self.shared.sender_gone.is_cancelled() {
                return self.try_recv();
            }
            tokio::select! {
                _ = self.shared.ready.notified() => {}
                _ = self.shared.sender_gone.cancelled() => {}
            }
        }
    }

    /// Takes the unread value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        let mut slots = self.shared.slots.lock();
        slots.initial.take().or_else(|| slots.latest.take())
    }
}

impl<T> Drop for Changes<T> {
    fn drop(&mut self) {
        self.shared.receiver_gone.cancel();
    }
}
