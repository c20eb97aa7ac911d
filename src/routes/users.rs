//! User administration: listing, guarded role mutation, and per-section
//! permission grants. Grant and role mutations require `edit` on the
//! `users` section and are audited with Critical severity.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guard::{self, RoleChange};
use crate::authz::{decide, resolve_principal, section, Capability};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::grant::{EffectivePermissionsResponse, GrantUpsertRequest, PermissionGrant};
use crate::models::user::{RoleChangeRequest, User};
use crate::store;

async fn authorize_users_section(
    state: &AppState,
    auth: &AuthUser,
    required: &[Capability],
) -> AppResult<User> {
    let actor = store::fetch_user(&state.pool, auth.user_id).await?;
    let principal = resolve_principal(&state.pool, &state.sections, &actor).await?;
    decide(Some(&principal), section::USERS, required, None).into_result()?;
    Ok(actor)
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "List users", body = [User])),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<User>>> {
    authorize_users_section(&state, &auth, &[Capability::View]).await?;

    let rows = sqlx::query_as::<_, crate::models::user::DbUser>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at, deleted_at \
         FROM users WHERE deleted_at IS NULL ORDER BY username",
    )
    .fetch_all(&state.pool)
    .await?;

    let users: Vec<User> = rows
        .into_iter()
        .map(User::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = User),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    authorize_users_section(&state, &auth, &[Capability::View]).await?;
    let user = store::fetch_user(&state.pool, id).await?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/users/{id}/role",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = RoleChangeRequest,
    responses(
        (status = 200, description = "Role changed", body = User),
        (status = 403, description = "Denied, including last-admin protection"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleChangeRequest>,
) -> AppResult<Json<User>> {
    authorize_users_section(&state, &auth, &[Capability::Edit]).await?;

    match guard::change_role(&state.pool, id, req.role).await? {
        RoleChange::Denied(reason) => Err(reason.into_error()),
        RoleChange::Applied { before, after } => {
            log_activity_with_context(
                &state.event_bus,
                "role_changed",
                Some(auth.user_id),
                &after,
                Some(&before),
                Some(RequestContext::from_headers(&headers)),
            );
            Ok(Json(after))
        }
    }
}

#[utoipa::path(
    get,
    path = "/users/{id}/grants",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Stored grants", body = [PermissionGrant])),
    security(("bearerAuth" = []))
)]
pub async fn list_grants(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<PermissionGrant>>> {
    authorize_users_section(&state, &auth, &[Capability::View]).await?;
    // 404 before leaking grant data for unknown users.
    store::fetch_user(&state.pool, id).await?;
    let grants = store::fetch_grants(&state.pool, id).await?;
    Ok(Json(grants))
}

#[utoipa::path(
    put,
    path = "/users/{id}/grants/{grant_section}",
    tag = "Users",
    params(
        ("id" = Uuid, Path, description = "User ID"),
        ("grant_section" = String, Path, description = "Section name"),
    ),
    request_body = GrantUpsertRequest,
    responses(
        (status = 200, description = "Grant stored", body = PermissionGrant),
        (status = 204, description = "Grant removed (empty capability set)"),
        (status = 400, description = "Unknown section"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn upsert_grant(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, grant_section)): Path<(Uuid, String)>,
    Json(req): Json<GrantUpsertRequest>,
) -> Result<Response, AppError> {
    authorize_users_section(&state, &auth, &[Capability::Edit]).await?;

    if !state.sections.contains(&grant_section) {
        return Err(AppError::bad_request(format!("unknown section: {grant_section}")));
    }

    let target = store::fetch_user(&state.pool, id).await?;
    let context = RequestContext::from_headers(&headers);

    match store::upsert_grant(&state.pool, target.id, &grant_section, &req.capabilities).await? {
        Some(grant) => {
            log_activity_with_context(
                &state.event_bus,
                "upserted",
                Some(auth.user_id),
                &grant,
                None,
                Some(context),
            );
            Ok((StatusCode::OK, Json(grant)).into_response())
        }
        None => {
            let revoked = PermissionGrant {
                user_id: target.id,
                section: grant_section,
                capabilities: Default::default(),
                created_at: crate::utils::utc_now(),
                updated_at: crate::utils::utc_now(),
            };
            log_activity_with_context(
                &state.event_bus,
                "revoked",
                Some(auth.user_id),
                &revoked,
                None,
                Some(context),
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/users/{id}/effective-permissions",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Resolved permission map", body = EffectivePermissionsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissionsResponse>> {
    authorize_users_section(&state, &auth, &[Capability::View]).await?;

    let target = store::fetch_user(&state.pool, id).await?;
    let principal = resolve_principal(&state.pool, &state.sections, &target).await?;

    let sections: BTreeMap<_, _> = principal
        .sections()
        .iter()
        .map(|(section, caps)| (section.clone(), caps.clone()))
        .collect();

    Ok(Json(EffectivePermissionsResponse {
        user_id: target.id,
        role: target.role.as_str().to_string(),
        sections,
    }))
}
