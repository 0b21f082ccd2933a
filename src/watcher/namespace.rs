//! Namespace strings watcher
//!
//! Reports the identifiers that changed in one namespace. The first value is
//! the deduplicated result of the initial query; after that each value carries the
//! deduplicated identifiers of every batch received since the previous value
//! was read.

use tracing::debug;

use super::base::dedup_ids;
use super::BaseWatcher;
use super::Mapper;
use super::NamespaceQuery;
use super::StringsWatcher;
use crate::ChangeType;
use crate::Error;
use crate::FilterOption;
use crate::Result;
use crate::WatchableDb;

/// Starts a strings watcher over `namespace`.
///
/// The subscription is registered before the initial query runs, so a write
/// racing the query shows up in a live batch rather than being lost.
pub(crate) async fn start_namespace_watcher<D, Q, M>(
    base: BaseWatcher<D>,
    namespace: &str,
    change_mask: ChangeType,
    initial: Q,
    mapper: M,
) -> Result<StringsWatcher>
where
    D: WatchableDb,
    Q: NamespaceQuery<D>,
    M: Mapper<D>,
{
    let subscription = base.subscribe(vec![FilterOption::namespace(namespace, change_mask)])?;

    let rows = initial.query(base.db()).await.map_err(|e| Error::InitialQuery {
        namespace: namespace.to_string(),
        reason: e.to_string(),
    })?;
    let seed = dedup_ids(rows);

    debug!(
        namespace = namespace,
        change_mask = ?change_mask,
        initial = seed.len(),
        "Namespace watcher started"
    );

    Ok(base.run(subscription, seed, mapper))
}
