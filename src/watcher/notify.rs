//! Notify and value watchers
//!
//! Emit a bare `()` whenever a matching change arrives. Like every watcher
//! they pulse once at start, which consumers such as the MultiWatcher read as
//! proof of liveness. Empty batches, including the empty confirmation a
//! source may send when a subscription goes live, are never forwarded.

use tracing::debug;

use super::BaseWatcher;
use super::Mapper;
use super::NotifyWatcher;
use crate::FilterOption;
use crate::Result;
use crate::WatchableDb;

pub(crate) fn start_notify_watcher<D, M>(
    base: BaseWatcher<D>,
    opts: Vec<FilterOption>,
    mapper: M,
) -> Result<NotifyWatcher>
where
    D: WatchableDb,
    M: Mapper<D>,
{
    debug!(opts = ?opts, "Notify watcher starting");
    let subscription = base.subscribe(opts)?;
    Ok(base.run(subscription, (), mapper))
}
