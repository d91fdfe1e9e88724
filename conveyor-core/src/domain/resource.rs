//! Resource version domain types

use serde::{Deserialize, Serialize};

/// Stable identifier of a resource, unique within a pipeline
pub type ResourceId = i64;

/// Stable identifier of a discovered version, unique within a resource
pub type VersionId = i64;

/// Per-resource discovery sequence number. Defines "latest", not wall-clock time.
pub type CheckOrder = i64;

/// One discovered version of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub resource_id: ResourceId,
    pub version_id: VersionId,
    pub check_order: CheckOrder,
    pub enabled: bool,
}

impl ResourceVersion {
    /// Creates an enabled version
    pub fn new(resource_id: ResourceId, version_id: VersionId, check_order: CheckOrder) -> Self {
        Self {
            resource_id,
            version_id,
            check_order,
            enabled: true,
        }
    }

    /// Returns a copy with the enabled flag replaced
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
