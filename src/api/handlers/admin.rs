//! Administrative principal management, mounted under the admin prefix.
//!
//! Role changes happen only here. The caller must hold the admin role; this
//! is checked again here whatever prefixes the gate is configured with.

use super::{json_body, me::PrincipalView};
use crate::{
    api::error::{ApiError, ApiResponse},
    session::{Principal, Role, Roles, SessionManager},
};
use axum::{
    Json,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateRolesRequest {
    pub roles: Vec<Role>,
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/roles",
    params(("id" = Uuid, Path, description = "Principal id")),
    request_body = UpdateRolesRequest,
    responses(
        (status = 200, description = "Roles replaced.", body = PrincipalView),
        (status = 400, description = "Invalid id or role list."),
        (status = 401, description = "Missing or invalid access token."),
        (status = 403, description = "Caller is not an admin."),
        (status = 404, description = "No such principal."),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn update_roles(
    sessions: Extension<Arc<SessionManager>>,
    Extension(actor): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRolesRequest>, JsonRejection>,
) -> Response {
    let id = match id {
        Ok(Path(id)) => id,
        Err(rejection) => return ApiError::Validation(rejection.body_text()).into_response(),
    };
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let roles: Roles = request.roles.into_iter().collect();
    if let Err(err) = check_roles(&actor, id, roles) {
        return err.into_response();
    }

    match sessions.credentials().update_roles(id, roles).await {
        Ok(Some(principal)) => {
            info!(actor = %actor.id, target = %id, ?roles, "principal roles updated");
            (
                StatusCode::OK,
                Json(ApiResponse::data(PrincipalView::from(&principal))),
            )
                .into_response()
        }
        Ok(None) => ApiError::NotFound("user not found".to_string()).into_response(),
        Err(err) => ApiError::Internal(err.context("failed to update roles")).into_response(),
    }
}

fn check_roles(actor: &Principal, target: Uuid, roles: Roles) -> Result<(), ApiError> {
    if !actor.roles.contains(Role::Admin) {
        return Err(ApiError::Forbidden(format!("{} role required", Role::Admin)));
    }
    if roles.is_empty() {
        return Err(ApiError::Validation("roles must not be empty".to_string()));
    }
    if actor.id == target && !roles.contains(Role::Admin) {
        return Err(ApiError::Validation(
            "admins cannot remove their own admin role".to_string(),
        ));
    }
    Ok(())
}
