//! MultiWatcher: merges N watchers of one payload type into one
//!
//! ```text
//!  source 0 ──▶ forwarder 0 ─┐
//!  source 1 ──▶ forwarder 1 ─┼──▶ staging ──▶ aggregator ──▶ changes()
//!  source N ──▶ forwarder N ─┘
//! ```
//!
//! Every forwarder combines what its source emits into a private staged value
//! until the aggregator takes it. The aggregator combines staged values into
//! the output mailbox, where they merge with whatever the consumer has not
//! read yet; a read empties it. At most one combined value is ever in
//! flight, and values arriving before a read all end up in that read.
//!
//! All tasks and all source watchers share one scope: the combinator lives
//! and dies as a whole.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::Span;

use super::mailbox::mailbox;
use super::mailbox::MailboxSender;
use super::Changes;
use super::Scope;
use super::Watcher;
use crate::Error;
use crate::Result;

/// Associative, order-insensitive combine function for MultiWatcher payloads
pub type Applier<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// Combiner for pure liveness signals
pub fn notify_applier() -> Applier<()> {
    Arc::new(|_, _| ())
}

/// Concatenates identifier batches. Relative order within one source is
/// preserved; order across sources is not.
pub fn strings_applier() -> Applier<Vec<String>> {
    Arc::new(|mut acc: Vec<String>, incoming: Vec<String>| {
        acc.extend(incoming);
        acc
    })
}

fn combine<T>(
    applier: &Applier<T>,
    acc: Option<T>,
    incoming: T,
) -> T {
    match acc {
        Some(acc) => applier(acc, incoming),
        None => incoming,
    }
}

/// Builds a watcher merging `watchers`.
///
/// Each source's initial event is consumed before this returns; the merged
/// watcher's own first value is the combination of those initial events.
/// A source that closes or stays silent for `initial_event_timeout` fails the
/// construction, and every source is stopped.
pub async fn new_multi_watcher<T>(
    watchers: Vec<Watcher<T>>,
    applier: Applier<T>,
    initial_event_timeout: Duration,
    span: Span,
) -> Result<Watcher<T>>
where
    T: Send + 'static,
{
    if watchers.is_empty() {
        return Err(Error::Fatal("multi watcher needs at least one source watcher".into()));
    }

    let scope = Scope::new(span);
    let mut sources = Vec::with_capacity(watchers.len());
    for watcher in watchers {
        let (changes, source_scope) = watcher.into_parts();
        scope.add(source_scope);
        sources.push(changes);
    }

    let mut initial: Option<T> = None;
    for (index, source) in sources.iter_mut().enumerate() {
        let value = match timeout(initial_event_timeout, source.recv()).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                return Err(abort(&scope, format!("source watcher {index} closed before its initial event")).await);
            }
            Err(_) => {
                return Err(abort(
                    &scope,
                    format!("source watcher {index} sent no initial event within {initial_event_timeout:?}"),
                )
                .await);
            }
        };
        initial = Some(combine(&applier, initial.take(), value));
    }

    let count = sources.len();
    let (staging_tx, staging_rx) = mpsc::channel(count);
    for (index, source) in sources.into_iter().enumerate() {
        scope.spawn(
            "multi_watcher_forwarder",
            forward(index, source, staging_tx.clone(), applier.clone()),
        );
    }
    drop(staging_tx);

    let (out, changes) = mailbox(initial);
    scope.spawn("multi_watcher_aggregator", aggregate(staging_rx, out, applier));

    debug!(sources = count, "Multi watcher started");
    Ok(Watcher::new(changes, scope))
}

/// Kills the scope, waits for teardown and returns the error to surface.
async fn abort(
    scope: &Scope,
    reason: String,
) -> Error {
    let err = Error::InitialEvent(reason);
    scope.kill(Some(err.clone()));
    // The first recorded error wins; a source may have failed first.
    match scope.wait().await {
        Err(e) => e,
        Ok(()) => err,
    }
}

async fn forward<T>(
    index: usize,
    mut source: Changes<T>,
    staging: mpsc::Sender<T>,
    applier: Applier<T>,
) -> Result<()>
where
    T: Send + 'static,
{
    let mut staged: Option<T> = None;
    loop {
        tokio::select! {
            value = source.recv() => {
                let Some(value) = value else {
                    // The source's own error, if any, reaches the scope
                    // through its supervisor.
                    debug!(source = index, "Source watcher stopped");
                    return Ok(());
                };
                staged = Some(combine(&applier, staged.take(), value));
            }
            permit = staging.reserve(), if staged.is_some() => {
                let Ok(permit) = permit else {
                    return Ok(());
                };
                if let Some(value) = staged.take() {
                    permit.send(value);
                }
            }
        }
    }
}

async fn aggregate<T>(
    mut staging: mpsc::Receiver<T>,
    out: MailboxSender<T>,
    applier: Applier<T>,
) -> Result<()>
where
    T: Send + 'static,
{
    loop {
        tokio::select! {
            value = staging.recv() => {
                let Some(value) = value else {
                    return Ok(());
                };
                out.put(value, |unread, value| applier(unread, value));
            }
            _ = out.closed() => {
                debug!("Multi watcher consumer gone");
                return Ok(());
            }
        }
    }
}
