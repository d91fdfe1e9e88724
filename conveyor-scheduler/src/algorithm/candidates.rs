//! Candidate generation
//!
//! Produces, for one input, the versions that satisfy the input's own
//! constraints before any cross-input constraint is considered.

use conveyor_core::domain::resource::{ResourceId, ResourceVersion, VersionId};

use super::versions_db::VersionsDB;

/// Eligible versions of one job input, most recent first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCandidates {
    pub input_name: String,
    pub resource_id: ResourceId,
    pub versions: Vec<ResourceVersion>,
}

/// Candidate versions of a resource
///
/// A pin yields that single version when it exists and is enabled, and nothing
/// otherwise. Without a pin every enabled version is a candidate, most recent
/// check order first.
pub fn candidates(
    db: &VersionsDB,
    resource_id: ResourceId,
    pinned_version: Option<VersionId>,
) -> Vec<ResourceVersion> {
    match pinned_version {
        Some(version_id) => db
            .version(resource_id, version_id)
            .filter(|version| version.enabled)
            .into_iter()
            .copied()
            .collect(),
        None => db
            .versions(resource_id)
            .iter()
            .filter(|version| version.enabled)
            .copied()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> VersionsDB {
        VersionsDB::builder(1)
            .version(ResourceVersion::new(1, 1, 1))
            .version(ResourceVersion::new(1, 2, 2).with_enabled(false))
            .version(ResourceVersion::new(1, 3, 3))
            .build()
    }

    fn ids(versions: &[ResourceVersion]) -> Vec<VersionId> {
        versions.iter().map(|v| v.version_id).collect()
    }

    #[test]
    fn test_enabled_versions_most_recent_first() {
        assert_eq!(ids(&candidates(&db(), 1, None)), vec![3, 1]);
    }

    #[test]
    fn test_pin_yields_single_version() {
        assert_eq!(ids(&candidates(&db(), 1, Some(1))), vec![1]);
    }

    #[test]
    fn test_pin_to_disabled_or_missing_version_is_empty() {
        assert!(candidates(&db(), 1, Some(2)).is_empty());
        assert!(candidates(&db(), 1, Some(42)).is_empty());
    }

    #[test]
    fn test_unknown_resource_has_no_candidates() {
        assert!(candidates(&db(), 9, None).is_empty());
    }
}
