use std::fmt;
use std::sync::Arc;

use super::ChangeEvent;
use super::ChangeType;

type Predicate = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Scopes a subscription to one namespace, a change type mask and an
/// optional predicate over the event.
#[derive(Clone)]
pub struct FilterOption {
    namespace: String,
    change_mask: ChangeType,
    predicate: Option<Predicate>,
}

impl FilterOption {
    /// Every change in `namespace` whose type is in `change_mask`
    pub fn namespace(
        namespace: impl Into<String>,
        change_mask: ChangeType,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            change_mask,
            predicate: None,
        }
    }

    /// Changes to exactly one identifier within `namespace`
    pub fn value(
        namespace: impl Into<String>,
        changed: impl Into<String>,
        change_mask: ChangeType,
    ) -> Self {
        let changed = changed.into();
        Self::predicate(namespace, change_mask, move |event| event.changed() == changed)
    }

    /// Changes in `namespace` matching `change_mask` for which `predicate`
    /// returns true
    pub fn predicate<F>(
        namespace: impl Into<String>,
        change_mask: ChangeType,
        predicate: F,
    ) -> Self
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            namespace: namespace.into(),
            change_mask,
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    pub fn change_mask(&self) -> ChangeType {
        self.change_mask
    }

    pub fn matches(
        &self,
        event: &ChangeEvent,
    ) -> bool {
        event.namespace() == self.namespace
            && self.change_mask.intersects(event.change_type())
            && self.predicate.as_ref().map(|p| p(event)).unwrap_or(true)
    }
}

impl fmt::Debug for FilterOption {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("FilterOption")
            .field("namespace", &self.namespace)
            .field("change_mask", &self.change_mask)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// True when `event` matches at least one of `opts`
pub fn matches_any(
    opts: &[FilterOption],
    event: &ChangeEvent,
) -> bool {
    opts.iter().any(|opt| opt.matches(event))
}
