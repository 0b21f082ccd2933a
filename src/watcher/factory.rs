//! WatcherFactory: the single construction point for watchers
//!
//! The change source handle is resolved at most once. Handing the factory a
//! ready handle ([`WatcherFactory::new`]) is preferred; a getter
//! ([`WatcherFactory::with_getter`]) is resolved on first use under a lock,
//! and a failed resolution is returned to the caller and retried on the next
//! call rather than internally.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug_span;
use tracing::Span;

use super::hash::start_hash_watcher;
use super::multi::new_multi_watcher;
use super::multi::notify_applier;
use super::multi::strings_applier;
use super::namespace::start_namespace_watcher;
use super::notify::start_notify_watcher;
use super::BaseWatcher;
use super::EmptyQuery;
use super::HashQuery;
use super::Mapper;
use super::NamespaceQuery;
use super::NotifyWatcher;
use super::PassThrough;
use super::StringsWatcher;
use crate::ChangeType;
use crate::Error;
use crate::FilterOption;
use crate::Result;
use crate::WatchConfig;
use crate::WatchableDb;

type DbGetter<D> = Box<dyn Fn() -> Result<Arc<D>> + Send + Sync>;

pub struct WatcherFactory<D: WatchableDb> {
    getter: DbGetter<D>,
    db: Mutex<Option<Arc<D>>>,
    config: WatchConfig,
    span: Span,
}

impl<D: WatchableDb> WatcherFactory<D> {
    pub fn new(
        db: Arc<D>,
        config: WatchConfig,
    ) -> Self {
        let handle = db.clone();
        Self {
            getter: Box::new(move || Ok(handle.clone())),
            db: Mutex::new(Some(db)),
            config,
            span: Span::current(),
        }
    }

    /// Resolves the change source through `getter` on first use.
    pub fn with_getter<F>(
        getter: F,
        config: WatchConfig,
    ) -> Self
    where
        F: Fn() -> Result<Arc<D>> + Send + Sync + 'static,
    {
        Self {
            getter: Box::new(getter),
            db: Mutex::new(None),
            config,
            span: Span::current(),
        }
    }

    /// Parent span of every watcher built by this factory.
    pub fn with_span(
        mut self,
        span: Span,
    ) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    fn watchable_db(&self) -> Result<Arc<D>> {
        let mut guard = self.db.lock();
        if let Some(db) = guard.as_ref() {
            return Ok(db.clone());
        }

        let db = (self.getter)().map_err(|e| match e {
            Error::SourceUnavailable(_) => e,
            other => Error::SourceUnavailable(other.to_string()),
        })?;
        *guard = Some(db.clone());
        Ok(db)
    }

    fn base(
        &self,
        span: Span,
    ) -> Result<BaseWatcher<D>> {
        Ok(BaseWatcher::new(self.watchable_db()?, span))
    }

    /// Watches every change matching `change_mask` in `namespace`; the first
    /// value is the result of `initial`.
    pub async fn new_namespace_watcher<Q>(
        &self,
        namespace: &str,
        change_mask: ChangeType,
        initial: Q,
    ) -> Result<StringsWatcher>
    where
        Q: NamespaceQuery<D>,
    {
        self.new_namespace_mapper_watcher(namespace, change_mask, initial, PassThrough)
            .await
    }

    /// Like [`Self::new_namespace_watcher`], with every batch passed through
    /// `mapper` first.
    pub async fn new_namespace_mapper_watcher<Q, M>(
        &self,
        namespace: &str,
        change_mask: ChangeType,
        initial: Q,
        mapper: M,
    ) -> Result<StringsWatcher>
    where
        Q: NamespaceQuery<D>,
        M: Mapper<D>,
    {
        let span = debug_span!(parent: &self.span, "namespace_watcher", namespace = %namespace);
        start_namespace_watcher(self.base(span)?, namespace, change_mask, initial, mapper).await
    }

    pub fn new_namespace_notify_watcher(
        &self,
        namespace: &str,
        change_mask: ChangeType,
    ) -> Result<NotifyWatcher> {
        self.new_namespace_notify_mapper_watcher(namespace, change_mask, PassThrough)
    }

    pub fn new_namespace_notify_mapper_watcher<M>(
        &self,
        namespace: &str,
        change_mask: ChangeType,
        mapper: M,
    ) -> Result<NotifyWatcher>
    where
        M: Mapper<D>,
    {
        let span = debug_span!(parent: &self.span, "notify_watcher", namespace = %namespace);
        start_notify_watcher(
            self.base(span)?,
            vec![FilterOption::namespace(namespace, change_mask)],
            mapper,
        )
    }

    /// Notifies on changes to the single identifier `changed` in `namespace`.
    pub fn new_value_watcher(
        &self,
        namespace: &str,
        changed: &str,
        change_mask: ChangeType,
    ) -> Result<NotifyWatcher> {
        self.new_value_mapper_watcher(namespace, changed, change_mask, PassThrough)
    }

    pub fn new_value_mapper_watcher<M>(
        &self,
        namespace: &str,
        changed: &str,
        change_mask: ChangeType,
        mapper: M,
    ) -> Result<NotifyWatcher>
    where
        M: Mapper<D>,
    {
        let span = debug_span!(parent: &self.span, "value_watcher", namespace = %namespace, value = %changed);
        start_notify_watcher(
            self.base(span)?,
            vec![FilterOption::value(namespace, changed, change_mask)],
            mapper,
        )
    }

    /// Notifies on changes matching any of `opts`.
    pub fn new_notify_watcher(
        &self,
        opts: Vec<FilterOption>,
    ) -> Result<NotifyWatcher> {
        self.new_notify_mapper_watcher(opts, PassThrough)
    }

    pub fn new_notify_mapper_watcher<M>(
        &self,
        opts: Vec<FilterOption>,
        mapper: M,
    ) -> Result<NotifyWatcher>
    where
        M: Mapper<D>,
    {
        let span = debug_span!(parent: &self.span, "notify_watcher", filters = opts.len());
        start_notify_watcher(self.base(span)?, opts, mapper)
    }

    /// Watches the hash returned by `query` for changes in `namespace`.
    ///
    /// The first value holds the current hash (empty if there is none); later
    /// values hold the new hash each time it moves, or `""` once it is gone.
    pub async fn new_hash_watcher<Q>(
        &self,
        namespace: &str,
        change_mask: ChangeType,
        query: Q,
    ) -> Result<StringsWatcher>
    where
        Q: HashQuery<D>,
    {
        let span = debug_span!(parent: &self.span, "hash_watcher", namespace = %namespace);
        start_hash_watcher(self.base(span)?, namespace, change_mask, query).await
    }

    /// Merges notify watchers; the result pulses whenever any of them does.
    pub async fn new_multi_notify_watcher(
        &self,
        watchers: Vec<NotifyWatcher>,
    ) -> Result<NotifyWatcher> {
        let span = debug_span!(parent: &self.span, "multi_notify_watcher", sources = watchers.len());
        new_multi_watcher(
            watchers,
            notify_applier(),
            self.config.initial_event_timeout(),
            span,
        )
        .await
    }

    /// Merges strings watchers by concatenating their identifier batches.
    pub async fn new_multi_strings_watcher(
        &self,
        watchers: Vec<StringsWatcher>,
    ) -> Result<StringsWatcher> {
        let span = debug_span!(parent: &self.span, "multi_strings_watcher", sources = watchers.len());
        new_multi_watcher(
            watchers,
            strings_applier(),
            self.config.initial_event_timeout(),
            span,
        )
        .await
    }

    /// A namespace watcher with no initial identifiers.
    pub async fn new_empty_namespace_watcher(
        &self,
        namespace: &str,
        change_mask: ChangeType,
    ) -> Result<StringsWatcher> {
        self.new_namespace_watcher(namespace, change_mask, EmptyQuery).await
    }
}

impl<D: WatchableDb> fmt::Debug for WatcherFactory<D> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatcherFactory")
            .field("resolved", &self.db.lock().is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
