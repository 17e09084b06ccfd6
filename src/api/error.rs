//! Response envelope and error classification for the HTTP boundary.
//!
//! Every body is `{data?, message?}`. Validation, conflict and not-found
//! messages reach the client; 401, 403 and 500 only carry the status reason.
//! The full cause is always logged.

use crate::session::SessionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::Conflict(message) | Self::NotFound(message) => {
                message.clone()
            }
            Self::Unauthorized(_) | Self::Forbidden(_) | Self::Internal(_) => self
                .status()
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(err) => error!(status = status.as_u16(), "internal error: {err:#}"),
            _ => warn!(status = status.as_u16(), "request rejected: {self}"),
        }

        (status, Json(ApiResponse::message(self.client_message()))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(message) => Self::Validation(message),
            SessionError::EmailAlreadyRegistered => Self::Conflict(err.to_string()),
            SessionError::Internal(err) => Self::Internal(err),
            SessionError::PrincipalNotFound
            | SessionError::InvalidCredentials
            | SessionError::InvalidToken(_)
            | SessionError::WrongTokenKind
            | SessionError::InvalidSubject
            | SessionError::RefreshTokenNotFound
            | SessionError::RefreshTokenExpired => Self::Unauthorized(err.to_string()),
        }
    }
}
