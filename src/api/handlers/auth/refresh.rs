use super::types::{RefreshRequest, TokenPairResponse};
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
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair; the presented refresh token is consumed.", body = TokenPairResponse),
        (status = 400, description = "Missing refresh token."),
        (status = 401, description = "Invalid, expired, superseded or already used refresh token."),
    ),
    tag = "auth"
)]
pub async fn refresh(
    sessions: Extension<Arc<SessionManager>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match sessions.refresh(&request.refresh_token).await {
        Ok(pair) => (
            StatusCode::OK,
            Json(ApiResponse::data(TokenPairResponse::from(pair))),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
