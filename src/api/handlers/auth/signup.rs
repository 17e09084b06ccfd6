use super::types::CredentialsRequest;
use crate::{
    api::{
        error::{ApiError, ApiResponse},
        handlers::json_body,
    },
    session::SessionManager,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Principal registered."),
        (status = 400, description = "Missing or malformed email or password."),
        (status = 409, description = "Email already registered."),
    ),
    tag = "auth"
)]
pub async fn sign_up(
    sessions: Extension<Arc<SessionManager>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match sessions.sign_up(&request.email, &request.password).await {
        Ok(_) => (
            StatusCode::CREATED,
            Json(ApiResponse::message("user has been signed up")),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
