//! Pluggable strategies run by watchers against the backing store
//!
//! - [`NamespaceQuery`]: produces the initial identifiers, once, at start
//! - [`Mapper`]: reduces or filters each live batch before it is dispatched
//!
//! Both receive the [`WatchableDb`] handle as their transaction runner.
//! Plain async closures implement both traits. Cancellation is cooperative:
//! when a watcher dies, an in-flight query or mapper future is dropped at its
//! next await point.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::ChangeBatch;
use crate::Result;
use crate::WatchableDb;

/// Transforms a raw batch into the batch a watcher dispatches.
///
/// Returning an empty batch suppresses the dispatch for that input. Errors
/// are fatal to the watcher running the mapper.
#[async_trait]
pub trait Mapper<D: WatchableDb>: Send + 'static {
    async fn map(
        &mut self,
        db: Arc<D>,
        changes: ChangeBatch,
    ) -> Result<ChangeBatch>;
}

#[async_trait]
impl<D, F, Fut> Mapper<D> for F
where
    D: WatchableDb,
    F: FnMut(Arc<D>, ChangeBatch) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ChangeBatch>> + Send,
{
    async fn map(
        &mut self,
        db: Arc<D>,
        changes: ChangeBatch,
    ) -> Result<ChangeBatch> {
        (self)(db, changes).await
    }
}

/// Forwards every batch unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl<D: WatchableDb> Mapper<D> for PassThrough {
    async fn map(
        &mut self,
        _db: Arc<D>,
        changes: ChangeBatch,
    ) -> Result<ChangeBatch> {
        Ok(changes)
    }
}

/// Initial state of a namespace watcher
#[async_trait]
pub trait NamespaceQuery<D: WatchableDb>: Send + Sized + 'static {
    async fn query(
        self,
        db: Arc<D>,
    ) -> Result<Vec<String>>;
}

#[async_trait]
impl<D, F, Fut> NamespaceQuery<D> for F
where
    D: WatchableDb,
    F: FnOnce(Arc<D>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<String>>> + Send,
{
    async fn query(
        self,
        db: Arc<D>,
    ) -> Result<Vec<String>> {
        (self)(db).await
    }
}

/// Initial query reporting nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyQuery;

#[async_trait]
impl<D: WatchableDb> NamespaceQuery<D> for EmptyQuery {
    async fn query(
        self,
        _db: Arc<D>,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
