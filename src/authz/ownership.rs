use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::task::Task;
use crate::models::user::{Role, User};

/// Terminal status that triggers completion stamping.
pub const STATUS_DONE: &str = "done";

/// Instance-level policy for task resources, layered on top of section
/// capabilities. Managers and admins act on any task; creators act only
/// on tasks they created or are assigned to.
pub fn can_view(user: &User, task: &Task) -> bool {
    match user.role {
        Role::Admin | Role::TaskManager => true,
        Role::TaskCreator => is_creator_or_assignee(user.id, task),
    }
}

/// Coarse role gate: every authenticated role may create tasks,
/// independent of granular grants.
pub fn can_create(user: &User) -> bool {
    matches!(user.role, Role::Admin | Role::TaskManager | Role::TaskCreator)
}

pub fn can_update(user: &User, task: &Task) -> bool {
    match user.role {
        Role::Admin | Role::TaskManager => true,
        Role::TaskCreator => is_creator_or_assignee(user.id, task),
    }
}

pub fn can_delete(user: &User, task: &Task) -> bool {
    match user.role {
        Role::Admin | Role::TaskManager => true,
        Role::TaskCreator => user.id == task.created_by,
    }
}

fn is_creator_or_assignee(user_id: Uuid, task: &Task) -> bool {
    user_id == task.created_by || task.assignees.contains(&user_id)
}

/// SQL predicate restricting a task listing to rows the user may view.
/// Filtering happens server-side so hidden tasks never leave storage.
/// Binds the user id twice.
pub fn visibility_filter_sql(role: Role) -> &'static str {
    match role {
        Role::Admin | Role::TaskManager => "1 = 1",
        Role::TaskCreator => {
            "(t.created_by = ? OR t.id IN (SELECT task_id FROM task_assignees WHERE user_id = ?))"
        }
    }
}

pub fn visibility_filter_binds(role: Role) -> usize {
    match role {
        Role::Admin | Role::TaskManager => 0,
        Role::TaskCreator => 2,
    }
}

/// Computes the `completed_at` change for a status transition.
///
/// Returns `None` when the marker must not be touched; `Some(value)` is
/// applied exactly once per transition into or out of the terminal state.
pub fn completion_stamp(
    old_status: &str,
    new_status: &str,
    now: DateTime<Utc>,
) -> Option<Option<DateTime<Utc>>> {
    let was_done = old_status == STATUS_DONE;
    let is_done = new_status == STATUS_DONE;

    match (was_done, is_done) {
        (false, true) => Some(Some(now)),
        (true, false) => Some(None),
        _ => None,
    }
}
