use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt;

use opsdesk::create_app;
use opsdesk::store;

async fn setup(name: &str) -> Result<(tempfile::TempDir, SqlitePool, Router)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join(name);
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((dir, pool, app))
}

async fn register(app: &Router, username: &str) -> Result<(String, String)> {
    let body_json = json!({
        "username": username,
        "email": format!("{username}@example.com"),
        "password": "password123"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(body_json.to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)?;
    let token = json.get("token").and_then(|v| v.as_str()).context("missing token")?.to_string();
    let id = json
        .get("user")
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .context("missing user id")?
        .to_string();
    Ok((token, id))
}

async fn create_task(app: &Router, token: &str, title: &str) -> Result<serde_json::Value> {
    let req = Request::builder()
        .method("POST")
        .uri("/tasks")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(json!({"title": title}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn creators_only_see_their_own_tasks() -> Result<()> {
    let (_dir, pool, app) = setup("visibility.db").await?;

    let (c1_token, _c1_id) = register(&app, "creator1").await?;
    let (c2_token, c2_id) = register(&app, "creator2").await?;

    let task = create_task(&app, &c1_token, "private work").await?;
    let task_id = task.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();

    // Even full capabilities on the tasks section do not widen a
    // creator's access past ownership.
    let c2_uuid = uuid::Uuid::parse_str(&c2_id)?;
    let full: std::collections::HashSet<_> = opsdesk::authz::Capability::ALL.into_iter().collect();
    store::upsert_grant(&pool, c2_uuid, "tasks", &full).await?;

    // Hidden task answers 404, not 403, so existence does not leak.
    let req = Request::builder()
        .method("GET")
        .uri(format!("/tasks/{task_id}"))
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Nor does the listing include it; filtering happens server-side.
    let req = Request::builder()
        .method("GET")
        .uri("/tasks")
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let list: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(list.as_array().map(|a| a.len()), Some(0));

    // Updates are equally invisible.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::from(json!({"title": "hijacked"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn assignee_can_view_and_update_but_not_delete() -> Result<()> {
    let (_dir, _pool, app) = setup("assignee.db").await?;

    let (c1_token, _c1_id) = register(&app, "owner").await?;
    let (c2_token, c2_id) = register(&app, "assignee").await?;

    let task = create_task(&app, &c1_token, "shared work").await?;
    let task_id = task.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();

    // Owner assigns the second creator.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {c1_token}"))
        .body(Body::from(json!({"assignees": [c2_id]}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Assignee now views the task without holding any grant.
    let req = Request::builder()
        .method("GET")
        .uri(format!("/tasks/{task_id}"))
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // And may update it.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::from(json!({"status": "in_progress"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // But deletion stays with the creator (and managers/admins).
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/tasks/{task_id}"))
        .header("authorization", format!("Bearer {c2_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // The creator may delete their own task.
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/tasks/{task_id}"))
        .header("authorization", format!("Bearer {c1_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn manager_acts_on_foreign_tasks_without_grants() -> Result<()> {
    let (_dir, pool, app) = setup("manager.db").await?;

    let (c_token, _c_id) = register(&app, "worker").await?;
    let (m_token, m_id) = register(&app, "boss").await?;
    sqlx::query("UPDATE users SET role = 'task_manager' WHERE id = ?")
        .bind(&m_id)
        .execute(&pool)
        .await?;

    let task = create_task(&app, &c_token, "reviewed work").await?;
    let task_id = task.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();

    // Managers hold no grants here; the role alone carries them.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {m_token}"))
        .body(Body::from(json!({"status": "in_progress"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder()
        .method("GET")
        .uri("/tasks")
        .header("authorization", format!("Bearer {m_token}"))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let list: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(list.as_array().map(|a| a.len()), Some(1));

    Ok(())
}

#[tokio::test]
async fn update_applies_fields_and_assignees_together() -> Result<()> {
    let (_dir, pool, app) = setup("atomic_update.db").await?;

    let (token, _id) = register(&app, "author").await?;
    let (_t2, helper_id) = register(&app, "helper").await?;

    let task = create_task(&app, &token, "draft").await?;
    let task_id = task.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();

    // Title, status, and the assignee set change in one request; the
    // response and storage must reflect all three.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({
                "title": "final draft",
                "status": "in_progress",
                "assignees": [helper_id]
            })
            .to_string(),
        ))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let updated: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(updated.get("title").and_then(|v| v.as_str()), Some("final draft"));
    assert_eq!(updated.get("status").and_then(|v| v.as_str()), Some("in_progress"));
    assert_eq!(
        updated.get("assignees").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let stored: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM task_assignees WHERE task_id = ? AND user_id = ?")
            .bind(&task_id)
            .bind(&helper_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(stored, 1);

    Ok(())
}

#[tokio::test]
async fn completion_marker_follows_status_transitions() -> Result<()> {
    let (_dir, _pool, app) = setup("completion.db").await?;

    let (token, _id) = register(&app, "finisher").await?;
    let task = create_task(&app, &token, "finish me").await?;
    let task_id = task.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();
    assert!(task.get("completed_at").map(|v| v.is_null()).unwrap_or(false));

    // Transition into done stamps the marker.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(json!({"status": "done"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let done: serde_json::Value = serde_json::from_slice(&bytes)?;
    let stamped = done
        .get("completed_at")
        .and_then(|v| v.as_str())
        .context("completed_at missing after done")?
        .to_string();

    // A second update that stays done must not re-stamp.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(json!({"title": "finished", "status": "done"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let still_done: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(
        still_done.get("completed_at").and_then(|v| v.as_str()),
        Some(stamped.as_str())
    );

    // Leaving done clears it.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(json!({"status": "pending"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let reopened: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert!(reopened.get("completed_at").map(|v| v.is_null()).unwrap_or(false));

    Ok(())
}
