//! Hash-keyed watchers
//!
//! Some entities are watched through a derived value, such as the hash of a
//! computed configuration, rather than through their row id. [`HashMapper`]
//! keeps the last known hash in watcher-local state, re-reads the current
//! hash for every batch and only dispatches when it moved. The dispatched
//! event carries the new hash as its changed identity, or an empty
//! identity when the hash went away.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::trace;

use super::BaseWatcher;
use super::Mapper;
use super::StringsWatcher;
use crate::ChangeBatch;
use crate::ChangeType;
use crate::Error;
use crate::FilterOption;
use crate::Result;
use crate::WatchableDb;

/// Side query returning the current hash rows. A healthy lookup yields zero
/// or one row.
#[async_trait]
pub trait HashQuery<D: WatchableDb>: Send + 'static {
    async fn current(
        &mut self,
        db: Arc<D>,
    ) -> Result<Vec<String>>;
}

#[async_trait]
impl<D, F, Fut> HashQuery<D> for F
where
    D: WatchableDb,
    F: FnMut(Arc<D>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<String>>> + Send,
{
    async fn current(
        &mut self,
        db: Arc<D>,
    ) -> Result<Vec<String>> {
        (self)(db).await
    }
}

/// Reduces the rows of a single-row lookup to the current hash.
///
/// More than one row means the store's invariant is broken; that is an
/// error, not "no hash".
pub(crate) fn single_hash(
    namespace: &str,
    mut rows: Vec<String>,
) -> Result<Option<String>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => Err(Error::HashIntegrity {
            namespace: namespace.to_string(),
            rows: n,
        }),
    }
}

/// Mapper that dispatches a batch only when the watched hash changed
pub struct HashMapper<Q> {
    namespace: String,
    current: Option<String>,
    query: Q,
}

impl<Q> HashMapper<Q> {
    /// `current` seeds the last known hash, normally from the initial query.
    pub fn new(
        namespace: impl Into<String>,
        current: Option<String>,
        query: Q,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            current,
            query,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

#[async_trait]
impl<D, Q> Mapper<D> for HashMapper<Q>
where
    D: WatchableDb,
    Q: HashQuery<D>,
{
    async fn map(
        &mut self,
        db: Arc<D>,
        changes: ChangeBatch,
    ) -> Result<ChangeBatch> {
        // Only the last change of the batch is forwarded, masked by the hash.
        let Some(last) = changes.last() else {
            return Ok(Vec::new());
        };

        let rows = self.query.current(db).await?;
        let hash = single_hash(&self.namespace, rows)?;
        if hash == self.current {
            trace!(namespace = %self.namespace, "Hash unchanged, suppressing dispatch");
            return Ok(Vec::new());
        }

        let masked = last.masked(hash.clone().unwrap_or_default());
        self.current = hash;
        Ok(vec![masked])
    }
}

/// Starts a strings watcher reporting the hash `query` returns.
///
/// The first value holds the current hash, or nothing when there is none.
pub(crate) async fn start_hash_watcher<D, Q>(
    base: BaseWatcher<D>,
    namespace: &str,
    change_mask: ChangeType,
    mut query: Q,
) -> Result<StringsWatcher>
where
    D: WatchableDb,
    Q: HashQuery<D>,
{
    let subscription = base.subscribe(vec![FilterOption::namespace(namespace, change_mask)])?;

    let rows = query.current(base.db()).await.map_err(|e| Error::InitialQuery {
        namespace: namespace.to_string(),
        reason: e.to_string(),
    })?;
    let current = single_hash(namespace, rows)?;
    let seed: Vec<String> = current.iter().cloned().collect();

    debug!(namespace = namespace, current = ?current, "Hash watcher started");

    Ok(base.run(subscription, seed, HashMapper::new(namespace, current, query)))
}
