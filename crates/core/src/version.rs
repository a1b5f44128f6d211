//! Store-managed entity versions and optimistic concurrency expectations.

use serde::{Deserialize, Serialize};

/// Opaque, store-assigned version token of a persisted entity.
///
/// `EntityVersion::UNVERSIONED` (zero) is used for states that have never been
/// persisted, or by stores that do not track versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityVersion(u64);

impl EntityVersion {
    pub const UNVERSIONED: EntityVersion = EntityVersion(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// The version following this one, or `None` once the counter is
    /// exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    pub fn is_unversioned(self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for EntityVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Optimistic concurrency expectation for one entity in a change-set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, forced overwrites).
    Any,
    /// The entity must not exist yet (inserts).
    Absent,
    /// The entity must exist at exactly this version.
    Exact(EntityVersion),
}

impl ExpectedVersion {
    /// `actual` is `None` when the store holds no record for the entity.
    pub fn matches(self, actual: Option<EntityVersion>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Absent, Some(_)) => false,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_requires_same_version() {
        let v3 = EntityVersion::new(3);
        assert!(ExpectedVersion::Exact(v3).matches(Some(v3)));
        assert!(!ExpectedVersion::Exact(v3).matches(v3.next()));
        assert!(!ExpectedVersion::Exact(v3).matches(None));
    }

    #[test]
    fn next_stops_at_the_last_version() {
        assert_eq!(EntityVersion::UNVERSIONED.next(), Some(EntityVersion::new(1)));
        assert_eq!(EntityVersion::new(u64::MAX).next(), None);
    }

    #[test]
    fn absent_requires_missing_record() {
        assert!(ExpectedVersion::Absent.matches(None));
        assert!(!ExpectedVersion::Absent.matches(Some(EntityVersion::new(1))));
    }

    #[test]
    fn any_always_matches() {
        assert!(ExpectedVersion::Any.matches(None));
        assert!(ExpectedVersion::Any.matches(Some(EntityVersion::new(9))));
    }
}
