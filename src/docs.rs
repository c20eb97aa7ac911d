use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::users::list_users,
        routes::users::get_user,
        routes::users::change_role,
        routes::users::list_grants,
        routes::users::upsert_grant,
        routes::users::effective_permissions,
        routes::tasks::list_tasks,
        routes::tasks::create_task,
        routes::tasks::get_task,
        routes::tasks::update_task,
        routes::tasks::delete_task,
    ),
    components(schemas(
        models::user::User,
        models::user::Role,
        models::user::AuthResponse,
        models::user::LoginRequest,
        models::user::RegisterRequest,
        models::user::RoleChangeRequest,
        models::grant::PermissionGrant,
        models::grant::GrantUpsertRequest,
        models::grant::EffectivePermissionsResponse,
        models::task::Task,
        models::task::TaskCreateRequest,
        models::task::TaskUpdateRequest,
        crate::authz::Capability,
        routes::health::HealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Users", description = "User, role and grant administration"),
        (name = "Tasks", description = "Task management under the ownership policy"),
        (name = "Health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
