use std::fmt;
use std::ops::BitOr;
use std::ops::BitOrAssign;

/// Kind of row change recorded in the change log.
///
/// Values are bit flags so several kinds can be combined into a mask:
/// `ChangeType::CREATE | ChangeType::UPDATE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeType(u8);

impl ChangeType {
    pub const CREATE: ChangeType = ChangeType(1);
    pub const UPDATE: ChangeType = ChangeType(1 << 1);
    pub const DELETE: ChangeType = ChangeType(1 << 2);
    pub const ALL: ChangeType = ChangeType(0b111);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when any bit of `other` is set in `self`.
    pub const fn intersects(
        self,
        other: ChangeType,
    ) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangeType {
    type Output = ChangeType;

    fn bitor(
        self,
        rhs: ChangeType,
    ) -> ChangeType {
        ChangeType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeType {
    fn bitor_assign(
        &mut self,
        rhs: ChangeType,
    ) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ChangeType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut names = Vec::new();
        if self.intersects(ChangeType::CREATE) {
            names.push("CREATE");
        }
        if self.intersects(ChangeType::UPDATE) {
            names.push("UPDATE");
        }
        if self.intersects(ChangeType::DELETE) {
            names.push("DELETE");
        }
        if names.is_empty() {
            return write!(f, "ChangeType(NONE)");
        }
        write!(f, "ChangeType({})", names.join("|"))
    }
}

/// One row change, as delivered by the change source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    change_type: ChangeType,
    namespace: String,
    changed: String,
}

impl ChangeEvent {
    pub fn new(
        change_type: ChangeType,
        namespace: impl Into<String>,
        changed: impl Into<String>,
    ) -> Self {
        Self {
            change_type,
            namespace: namespace.into(),
            changed: changed.into(),
        }
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Identifier of the changed row (or whatever the producer keyed it by)
    pub fn changed(&self) -> &str {
        &self.changed
    }

    pub fn into_changed(self) -> String {
        self.changed
    }

    /// Copy of this event whose changed identity is replaced by `changed`.
    ///
    /// Used by mappers that dispatch a derived key, e.g. a configuration
    /// hash, instead of the underlying row id.
    pub fn masked(
        &self,
        changed: impl Into<String>,
    ) -> Self {
        Self {
            change_type: self.change_type,
            namespace: self.namespace.clone(),
            changed: changed.into(),
        }
    }
}

/// Ordered changes committed by one transaction
pub type ChangeBatch = Vec<ChangeEvent>;
