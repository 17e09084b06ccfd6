pub mod admin;
pub mod auth;
pub mod health;
pub mod me;

use super::error::ApiError;
use axum::{Json, extract::rejection::JsonRejection};

/// Unwrap a JSON body, turning decode failures into a 400 envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

/// Fallback for unknown routes, reached only after the gate.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("route not found".to_string())
}
