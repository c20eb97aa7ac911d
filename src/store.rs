//! Keyed read/write glue over storage: the user directory and the
//! permission store. Kept free of policy so the decision engine can be
//! exercised against an in-memory database in tests.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::authz::Capability;
use crate::errors::{AppError, AppResult};
use crate::models::grant::PermissionGrant;
use crate::models::user::{DbUser, User};

pub async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at, deleted_at \
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))?;

    db_user.try_into()
}

pub async fn fetch_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at, deleted_at \
         FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(db_user)
}

pub async fn fetch_grants(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<PermissionGrant>> {
    let rows = sqlx::query(
        "SELECT user_id, section, capabilities, created_at, updated_at \
         FROM permission_grants WHERE user_id = ? ORDER BY section",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut grants = Vec::with_capacity(rows.len());
    for row in rows {
        let section: String = row.get("section");
        let raw: String = row.get("capabilities");
        let capabilities: HashSet<Capability> = serde_json::from_str(&raw)
            .map_err(|e| AppError::internal(format!("corrupt capability set for {section}: {e}")))?;
        grants.push(PermissionGrant {
            user_id,
            section,
            capabilities,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        });
    }

    Ok(grants)
}

/// Idempotent per-section upsert, last-write-wins under concurrent
/// writers. An empty capability set degenerates to grant absence: the row
/// is deleted rather than stored empty. Returns the stored grant, or
/// `None` when the upsert removed it.
pub async fn upsert_grant(
    pool: &SqlitePool,
    user_id: Uuid,
    section: &str,
    capabilities: &HashSet<Capability>,
) -> AppResult<Option<PermissionGrant>> {
    let now = Utc::now();

    if capabilities.is_empty() {
        sqlx::query("DELETE FROM permission_grants WHERE user_id = ? AND section = ?")
            .bind(user_id.to_string())
            .bind(section)
            .execute(pool)
            .await?;
        return Ok(None);
    }

    let caps_json = serde_json::to_string(capabilities)
        .map_err(|e| AppError::internal(format!("failed to encode capabilities: {e}")))?;

    sqlx::query(
        "INSERT INTO permission_grants (user_id, section, capabilities, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, section) \
         DO UPDATE SET capabilities = excluded.capabilities, updated_at = excluded.updated_at",
    )
    .bind(user_id.to_string())
    .bind(section)
    .bind(&caps_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Some(PermissionGrant {
        user_id,
        section: section.to_string(),
        capabilities: capabilities.clone(),
        created_at: now,
        updated_at: now,
    }))
}
