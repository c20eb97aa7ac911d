//! Task CRUD under the ownership policy.
//!
//! Every handler resolves the caller's principal, then gates the specific
//! task through the instance-level policy. A caller who may not view a
//! task gets 404, never 403, so denials do not leak that the task exists.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{decide, ownership, resolve_principal, section, Capability};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::task::{DbTask, Task, TaskCreateRequest, TaskUpdateRequest};
use crate::models::user::User;
use crate::store;
use crate::utils::utc_now;

const DEFAULT_STATUS: &str = "pending";

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    responses((status = 200, description = "Tasks visible to the caller", body = [Task])),
    security(("bearerAuth" = []))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Task>>> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;

    // The visibility filter runs in SQL so rows a creator may not view
    // never leave storage.
    let filter = ownership::visibility_filter_sql(actor.role);
    let sql = format!(
        "SELECT t.id, t.title, t.status, t.created_by, t.completed_at, t.created_at, t.updated_at, t.deleted_at \
         FROM tasks t WHERE t.deleted_at IS NULL AND {filter} ORDER BY t.created_at DESC",
    );

    let mut query = sqlx::query_as::<_, DbTask>(&sql);
    for _ in 0..ownership::visibility_filter_binds(actor.role) {
        query = query.bind(actor.id.to_string());
    }
    let rows = query.fetch_all(&state.pool).await?;

    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let assignees = fetch_assignees(&state.pool, row.id).await?;
        tasks.push(row.into_task(assignees));
    }

    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses((status = 201, description = "Task created", body = Task)),
    security(("bearerAuth" = []))
)]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;
    let principal = resolve_principal(&state.pool, &state.sections, &actor).await?;
    decide(
        Some(&principal),
        section::TASKS,
        &[Capability::Create],
        Some(ownership::can_create(&actor)),
    )
    .into_result()?;

    let task_id = Uuid::new_v4();
    let now = utc_now();
    let status = payload.status.unwrap_or_else(|| DEFAULT_STATUS.to_string());

    let completed_at = if status == ownership::STATUS_DONE { Some(now) } else { None };

    // Task row and assignee rows commit together or not at all.
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO tasks (id, title, status, created_by, completed_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(&payload.title)
    .bind(&status)
    .bind(actor.id.to_string())
    .bind(completed_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    replace_assignees(&mut tx, task_id, &payload.assignees).await?;

    tx.commit().await?;

    let task = fetch_task(&state.pool, task_id)
        .await?
        .ok_or_else(|| AppError::internal("task vanished after insert"))?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(actor.id),
        &task,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task details", body = Task),
        (status = 404, description = "Task not found or not visible"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;
    let task = fetch_visible_task(&state, &actor, id).await?;
    Ok(Json(task))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 403, description = "Visible but not updatable by the caller"),
        (status = 404, description = "Task not found or not visible"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;
    let task = fetch_visible_task(&state, &actor, id).await?;

    let principal = resolve_principal(&state.pool, &state.sections, &actor).await?;
    decide(
        Some(&principal),
        section::TASKS,
        &[Capability::Edit],
        Some(ownership::can_update(&actor, &task)),
    )
    .into_result()?;

    let now = utc_now();
    let title = payload.title.unwrap_or_else(|| task.title.clone());
    let status = payload.status.unwrap_or_else(|| task.status.clone());

    // Stamp or clear the completion marker exactly once per transition.
    let completed_at = match ownership::completion_stamp(&task.status, &status, now) {
        Some(value) => value,
        None => task.completed_at,
    };

    // Field changes and assignee replacement land in the same
    // transaction so a failure cannot leave them half applied.
    let mut tx = state.pool.begin().await?;

    // created_by is immutable after creation and deliberately absent here.
    sqlx::query(
        "UPDATE tasks SET title = ?, status = ?, completed_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&title)
    .bind(&status)
    .bind(completed_at)
    .bind(now)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if let Some(assignees) = &payload.assignees {
        replace_assignees(&mut tx, id, assignees).await?;
    }

    tx.commit().await?;

    let updated = fetch_task(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::internal("task vanished after update"))?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(actor.id),
        &updated,
        Some(&task),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 403, description = "Visible but not deletable by the caller"),
        (status = 404, description = "Task not found or not visible"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;
    let task = fetch_visible_task(&state, &actor, id).await?;

    let principal = resolve_principal(&state.pool, &state.sections, &actor).await?;
    decide(
        Some(&principal),
        section::TASKS,
        &[Capability::Delete],
        Some(ownership::can_delete(&actor, &task)),
    )
    .into_result()?;

    sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(actor.id),
        &task,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Loads a task and applies the view policy, collapsing "absent" and
/// "not visible" into the same 404.
async fn fetch_visible_task(state: &AppState, actor: &User, id: Uuid) -> AppResult<Task> {
    let task = fetch_task(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    let principal = resolve_principal(&state.pool, &state.sections, actor).await?;
    let decision = decide(
        Some(&principal),
        section::TASKS,
        &[Capability::View],
        Some(ownership::can_view(actor, &task)),
    );

    if !decision.is_allowed() {
        return Err(AppError::not_found("task not found"));
    }

    Ok(task)
}

async fn fetch_task(pool: &sqlx::SqlitePool, id: Uuid) -> AppResult<Option<Task>> {
    let row = sqlx::query_as::<_, DbTask>(
        "SELECT id, title, status, created_by, completed_at, created_at, updated_at, deleted_at \
         FROM tasks WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(db_task) => {
            let assignees = fetch_assignees(pool, db_task.id).await?;
            Ok(Some(db_task.into_task(assignees)))
        }
        None => Ok(None),
    }
}

async fn fetch_assignees(pool: &sqlx::SqlitePool, task_id: Uuid) -> AppResult<Vec<Uuid>> {
    let rows: Vec<String> =
        sqlx::query_scalar("SELECT user_id FROM task_assignees WHERE task_id = ? ORDER BY user_id")
            .bind(task_id.to_string())
            .fetch_all(pool)
            .await?;

    let mut assignees = Vec::with_capacity(rows.len());
    for raw in rows {
        let id = Uuid::parse_str(&raw)
            .map_err(|e| AppError::internal(format!("corrupt assignee id: {e}")))?;
        assignees.push(id);
    }

    Ok(assignees)
}

/// Full replacement of a task's assignee set inside the caller's
/// transaction.
async fn replace_assignees(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: Uuid,
    assignees: &[Uuid],
) -> AppResult<()> {
    let now = utc_now();

    sqlx::query("DELETE FROM task_assignees WHERE task_id = ?")
        .bind(task_id.to_string())
        .execute(&mut **tx)
        .await?;

    for user_id in assignees {
        sqlx::query(
            "INSERT OR IGNORE INTO task_assignees (task_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(user_id.to_string())
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
