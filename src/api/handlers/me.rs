//! Endpoints for the authenticated principal.
//!
//! The request gate has already resolved the principal; handlers receive it
//! as an `Extension<Principal>`.

use crate::{
    api::error::{ApiError, ApiResponse},
    session::{Principal, Role, SessionManager},
};
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct PrincipalView {
    pub id: Uuid,
    pub email: String,
    pub roles: Vec<Role>,
    pub created_at_unix: i64,
}

impl From<&Principal> for PrincipalView {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            email: principal.email.clone(),
            roles: principal.roles.iter().collect(),
            created_at_unix: principal.created_at_unix,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "The authenticated principal.", body = PrincipalView),
        (status = 401, description = "Missing or invalid access token."),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(Extension(principal): Extension<Principal>) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse::data(PrincipalView::from(&principal))),
    )
        .into_response()
}

#[utoipa::path(
    delete,
    path = "/api/me/session",
    responses(
        (status = 200, description = "All refresh tokens of the principal are revoked."),
        (status = 401, description = "Missing or invalid access token."),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn sign_out(
    sessions: Extension<Arc<SessionManager>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    match sessions.sign_out(principal.id).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::message("signed out"))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
