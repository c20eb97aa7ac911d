use std::collections::HashSet;

use sqlx::{Row, SqlitePool};

use super::{Capability, Principal, SectionRegistry};
use crate::errors::AppError;
use crate::models::user::User;

/// Builds the request-time [`Principal`] for a user.
///
/// Admins get the full capability set for every registered section without
/// touching the grants table, so a missing or corrupt permission store can
/// never lock an administrator out. Everyone else gets exactly their
/// stored grants; sections with no row resolve to the empty set.
pub async fn resolve_principal(
    pool: &SqlitePool,
    registry: &SectionRegistry,
    user: &User,
) -> Result<Principal, AppError> {
    if user.role.is_admin() {
        let mut principal = Principal::new(user.id, user.role);
        for section in registry.iter() {
            principal = principal.with_capabilities(section, Capability::ALL);
        }
        return Ok(principal);
    }

    let mut principal = Principal::new(user.id, user.role);
    for (section, capabilities) in fetch_grant_rows(pool, user).await? {
        principal = principal.with_capabilities(section, capabilities);
    }

    Ok(principal)
}

async fn fetch_grant_rows(
    pool: &SqlitePool,
    user: &User,
) -> Result<Vec<(String, HashSet<Capability>)>, AppError> {
    let query = sqlx::query(
        "SELECT section, capabilities FROM permission_grants WHERE user_id = ?",
    )
    .bind(user.id.to_string())
    .fetch_all(pool)
    .await;

    let rows = match query {
        Ok(rows) => rows,
        // An unprovisioned grants table means "nothing granted yet", not a
        // system failure. Other database errors still propagate.
        Err(err) if is_missing_table(&err) => {
            tracing::warn!(
                user_id = %user.id,
                "permission_grants table missing; resolving to empty permissions"
            );
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };

    let mut grants = Vec::with_capacity(rows.len());
    for row in rows {
        let section: String = row.get("section");
        let raw: String = row.get("capabilities");
        let capabilities: HashSet<Capability> = serde_json::from_str(&raw)
            .map_err(|e| AppError::internal(format!("corrupt capability set for {section}: {e}")))?;
        grants.push((section, capabilities));
    }

    Ok(grants)
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("no such table"),
        _ => false,
    }
}
