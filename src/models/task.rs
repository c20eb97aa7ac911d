use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[schema(example = "pending")]
    pub status: String,
    /// Immutable after creation.
    pub created_by: Uuid,
    pub assignees: Vec<Uuid>,
    /// Stamped when status enters "done", cleared when it leaves.
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    // Ids are stored as hyphenated TEXT; sqlx only decodes Uuid from BLOB.
    #[sqlx(try_from = "String")]
    pub id: Uuid,
    pub title: String,
    pub status: String,
    #[sqlx(try_from = "String")]
    pub created_by: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbTask {
    pub fn into_task(self, assignees: Vec<Uuid>) -> Task {
        Task {
            id: self.id,
            title: self.title,
            status: self.status,
            created_by: self.created_by,
            assignees,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Draft launch announcement")]
    pub title: String,
    #[schema(example = "pending")]
    pub status: Option<String>,
    #[serde(default)]
    pub assignees: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    #[schema(example = "done")]
    pub status: Option<String>,
    /// Full replacement of the assignee set when present.
    pub assignees: Option<Vec<Uuid>>,
}
