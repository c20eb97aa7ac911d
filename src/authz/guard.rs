use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::decision::DenyReason;
use crate::errors::AppError;
use crate::models::user::{DbUser, Role, User};

/// Outcome of a guarded role mutation. The before/after pair feeds the
/// audit log.
#[derive(Debug)]
pub enum RoleChange {
    Applied { before: User, after: User },
    Denied(DenyReason),
}

/// Applies a role change while preserving the invariant that at least one
/// administrator always remains.
///
/// Demotion away from `admin` runs as a single conditional UPDATE whose
/// WHERE clause re-counts admins, so two concurrent demotions of the last
/// admin cannot both succeed; the loser observes zero affected rows and
/// receives `LastAdminViolation`. Promotions and changes among non-admin
/// roles pass unconditionally — whether the *actor* may change roles at
/// all is the decision point's job, not this guard's.
pub async fn change_role(
    pool: &SqlitePool,
    target_id: Uuid,
    new_role: Role,
) -> Result<RoleChange, AppError> {
    let mut tx = pool.begin().await?;

    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at, deleted_at \
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(target_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))?;

    let before: User = db_user.try_into()?;
    let now = Utc::now();

    let demoting_admin = before.role.is_admin() && !new_role.is_admin();

    let result = if demoting_admin {
        sqlx::query(
            "UPDATE users SET role = ?, updated_at = ? \
             WHERE id = ? \
               AND (SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL) > 1",
        )
        .bind(new_role.as_str())
        .bind(now)
        .bind(target_id.to_string())
        .execute(&mut *tx)
        .await?
    } else {
        sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(new_role.as_str())
            .bind(now)
            .bind(target_id.to_string())
            .execute(&mut *tx)
            .await?
    };

    if demoting_admin && result.rows_affected() == 0 {
        tx.rollback().await?;
        tracing::info!(target = %target_id, "role change refused: last remaining admin");
        return Ok(RoleChange::Denied(DenyReason::LastAdminViolation));
    }

    tx.commit().await?;

    let after = User {
        role: new_role,
        updated_at: now,
        ..before.clone()
    };

    Ok(RoleChange::Applied { before, after })
}
