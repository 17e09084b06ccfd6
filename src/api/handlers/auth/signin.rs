use super::types::{CredentialsRequest, TokenPairResponse};
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
    path = "/api/auth/signin",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Signed in; any previous refresh token is revoked.", body = TokenPairResponse),
        (status = 400, description = "Missing email or password."),
        (status = 401, description = "Unknown email or wrong password."),
    ),
    tag = "auth"
)]
pub async fn sign_in(
    sessions: Extension<Arc<SessionManager>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match sessions.sign_in(&request.email, &request.password).await {
        Ok(pair) => (
            StatusCode::OK,
            Json(ApiResponse::data(TokenPairResponse::from(pair))),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
