use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt;

use opsdesk::authz::guard::{self, RoleChange};
use opsdesk::authz::DenyReason;
use opsdesk::create_app;
use opsdesk::models::user::Role;

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

async fn promote_to_admin(pool: &SqlitePool, user_id: &str) -> Result<()> {
    sqlx::query("UPDATE users SET role = 'admin' WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn demoting_the_last_admin_is_refused() -> Result<()> {
    let (_dir, pool, app) = setup("last_admin_http.db").await?;

    let (x_token, x_id) = register(&app, "xavier").await?;
    let (y_token, y_id) = register(&app, "yvonne").await?;
    promote_to_admin(&pool, &x_id).await?;
    promote_to_admin(&pool, &y_id).await?;

    // Two admins: demoting X succeeds and leaves exactly one admin.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/users/{x_id}/role"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {x_token}"))
        .body(Body::from(json!({"role": "task_manager"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let admin_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL")
            .fetch_one(&pool)
            .await?;
    assert_eq!(admin_count, 1);

    // One admin left: demoting Y is refused with the last-admin reason.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/users/{y_id}/role"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {y_token}"))
        .body(Body::from(json!({"role": "task_creator"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let err: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(err.get("error").and_then(|v| v.as_str()), Some("last_admin"));

    // Y is still an admin.
    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(&y_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(role, "admin");

    Ok(())
}

#[tokio::test]
async fn guard_semantics_direct() -> Result<()> {
    let (_dir, pool, app) = setup("last_admin_guard.db").await?;

    let (_token, solo_id) = register(&app, "solo").await?;
    promote_to_admin(&pool, &solo_id).await?;
    let solo = uuid::Uuid::parse_str(&solo_id)?;

    // Sole admin cannot be demoted.
    match guard::change_role(&pool, solo, Role::TaskManager).await? {
        RoleChange::Denied(reason) => assert_eq!(reason, DenyReason::LastAdminViolation),
        RoleChange::Applied { .. } => panic!("sole admin demotion must be denied"),
    }

    // Promotions are unconditionally allowed by the guard.
    let (_t2, other_id) = register(&app, "other").await?;
    let other = uuid::Uuid::parse_str(&other_id)?;
    match guard::change_role(&pool, other, Role::Admin).await? {
        RoleChange::Applied { before, after } => {
            assert_eq!(before.role, Role::TaskCreator);
            assert_eq!(after.role, Role::Admin);
        }
        RoleChange::Denied(_) => panic!("promotion must pass the guard"),
    }

    // With a second admin present the original demotion now succeeds.
    match guard::change_role(&pool, solo, Role::TaskManager).await? {
        RoleChange::Applied { after, .. } => assert_eq!(after.role, Role::TaskManager),
        RoleChange::Denied(_) => panic!("demotion with two admins must succeed"),
    }

    Ok(())
}

#[tokio::test]
async fn concurrent_demotions_never_remove_the_last_admin() -> Result<()> {
    let (_dir, pool, app) = setup("last_admin_race.db").await?;

    let (_xt, x_id) = register(&app, "racer1").await?;
    let (_yt, y_id) = register(&app, "racer2").await?;
    promote_to_admin(&pool, &x_id).await?;
    promote_to_admin(&pool, &y_id).await?;

    let x = uuid::Uuid::parse_str(&x_id)?;
    let y = uuid::Uuid::parse_str(&y_id)?;

    // Two admins demoted at the same time. The conditional UPDATE
    // re-counts admins in the same statement, so at most one demotion
    // can land; the other is denied or loses the write lock.
    let demote_x = tokio::spawn({
        let pool = pool.clone();
        async move { guard::change_role(&pool, x, Role::TaskCreator).await }
    });
    let demote_y = tokio::spawn({
        let pool = pool.clone();
        async move { guard::change_role(&pool, y, Role::TaskCreator).await }
    });

    let results = [demote_x.await?, demote_y.await?];
    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(RoleChange::Applied { .. })))
        .count();
    assert_eq!(applied, 1, "exactly one concurrent demotion may succeed");

    let admin_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL")
            .fetch_one(&pool)
            .await?;
    assert_eq!(admin_count, 1);

    Ok(())
}

#[tokio::test]
async fn non_admin_cannot_change_roles() -> Result<()> {
    let (_dir, _pool, app) = setup("last_admin_authz.db").await?;

    let (creator_token, _creator_id) = register(&app, "plain").await?;
    let (_t, target_id) = register(&app, "target").await?;

    // A task_creator with no users.edit grant is denied by the decision
    // point before the guard is ever consulted.
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/users/{target_id}/role"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {creator_token}"))
        .body(Body::from(json!({"role": "task_manager"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    Ok(())
}
