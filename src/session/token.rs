//! Signed access and refresh tokens.
//!
//! Flow Overview:
//! 1) `issue` builds claims from the principal id and the injected clock.
//! 2) Claims are signed with the shared secret using HS256 only.
//! 3) `parse` checks the header algorithm, verifies the signature, then
//!    structure, issuer and expiry, and returns the claims with the raw wire
//!    string.
//!
//! The `token_type` claim separates access tokens from refresh tokens. Callers
//! must check it with [`is_access_token`] or [`is_refresh_token`] before
//! trusting any other claim.

use super::clock::Clock;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access-token")]
    Access,
    #[serde(rename = "refresh-token")]
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "token_type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TokenKind>,
}

impl Claims {
    /// Subject as a principal id, if it is a valid UUID.
    #[must_use]
    pub fn principal_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Verified claims together with the exact wire string they came from.
#[derive(Clone)]
pub struct SignedToken {
    pub claims: Claims,
    pub raw: String,
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("claims", &self.claims)
            .field("raw", &"***")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access: SignedToken,
    pub refresh: SignedToken,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Deserialize)]
struct AlgorithmHeader {
    alg: Option<String>,
}

/// Anything but an HS256 header is a signature failure, including `none` and
/// algorithms `jsonwebtoken` cannot represent.
fn check_algorithm(raw: &str) -> Result<(), TokenError> {
    let Some(segment) = raw.split('.').next() else {
        return Err(TokenError::Malformed);
    };
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| TokenError::Malformed)?;
    let header: AlgorithmHeader =
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

    match header.alg.as_deref() {
        Some("HS256") => Ok(()),
        _ => Err(TokenError::InvalidSignature),
    }
}

/// Fails closed: a missing or unknown discriminator is never an access token.
#[must_use]
pub fn is_access_token(token: &SignedToken) -> bool {
    token.claims.kind == Some(TokenKind::Access)
}

#[must_use]
pub fn is_refresh_token(token: &SignedToken) -> bool {
    token.claims.kind == Some(TokenKind::Refresh)
}

#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString, issuer: impl Into<String>) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    fn ttl_seconds(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish()
    }
}

pub struct TokenCodec {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        let secret = config.secret.expose_secret().as_bytes();
        let encoding = EncodingKey::from_secret(secret);
        let decoding = DecodingKey::from_secret(secret);

        // Expiry is checked against the injected clock in `parse`.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            config,
            encoding,
            decoding,
            validation,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    /// Sign a token of `kind` for `principal_id`, valid from `now`.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if the claims cannot be encoded.
    pub fn issue(
        &self,
        principal_id: Uuid,
        kind: TokenKind,
        now: i64,
    ) -> Result<SignedToken, TokenError> {
        let claims = Claims {
            sub: principal_id.to_string(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.config.ttl_seconds(kind)),
            jti: Ulid::new().to_string(),
            kind: Some(kind),
        };

        let raw = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding)
            .map_err(TokenError::Signing)?;

        Ok(SignedToken { claims, raw })
    }

    /// Issue an access and a refresh token that share the same issued-at.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if either token cannot be encoded.
    pub fn issue_pair(&self, principal_id: Uuid) -> Result<TokenPair, TokenError> {
        let now = self.now();
        Ok(TokenPair {
            access: self.issue(principal_id, TokenKind::Access, now)?,
            refresh: self.issue(principal_id, TokenKind::Refresh, now)?,
        })
    }

    /// Verify `raw` and return its claims.
    ///
    /// # Errors
    /// - [`TokenError::InvalidSignature`] for a wrong key or any algorithm other than HS256,
    ///   `none` included.
    /// - [`TokenError::Malformed`] for undecodable tokens, missing claims or a foreign issuer.
    /// - [`TokenError::Expired`] once `exp` is not after the current time.
    pub fn parse(&self, raw: &str) -> Result<SignedToken, TokenError> {
        check_algorithm(raw)?;

        let data = decode::<Claims>(raw, &self.decoding, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.exp <= self.now() {
            return Err(TokenError::Expired);
        }

        Ok(SignedToken {
            claims: data.claims,
            raw: raw.to_string(),
        })
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
