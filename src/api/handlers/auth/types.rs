use crate::session::TokenPair;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Email and password; missing fields decode as empty and fail validation.
#[derive(Deserialize, ToSchema)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access.raw,
            refresh_token: pair.refresh.raw,
        }
    }
}
