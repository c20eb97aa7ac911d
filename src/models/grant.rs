use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Capability;

/// Stored association of a user, a section, and a non-empty capability set.
/// An empty set is never persisted; upserting one deletes the row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionGrant {
    pub user_id: Uuid,
    #[schema(example = "blogs")]
    pub section: String,
    pub capabilities: HashSet<Capability>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for PermissionGrant {
    fn entity_type() -> &'static str { "permission_grant" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> crate::events::Severity { crate::events::Severity::Critical }
    // Grant mutations change who may do what; always audit-critical.
    fn severity_for_action(&self, _action: &str) -> crate::events::Severity {
        crate::events::Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantUpsertRequest {
    /// Full replacement capability set for the section. An empty list
    /// removes the grant.
    pub capabilities: HashSet<Capability>,
}

/// Request-time view of what a user may do, returned by the
/// effective-permissions endpoint. BTreeMap keeps section order stable
/// for clients and tests.
#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    #[schema(example = "task_creator")]
    pub role: String,
    pub sections: BTreeMap<String, HashSet<Capability>>,
}
