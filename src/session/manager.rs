//! Sign-up, sign-in and refresh flows.
//!
//! Flow Overview:
//! 1) Sign-up normalizes and validates the email, then asks the credential
//!    store to create the principal. No tokens are issued.
//! 2) Sign-in compares the password once, issues a pair and rotates the
//!    ledger in a single transaction (revoke all, then store the new hash).
//!    An unknown email still pays for one comparison against a stand-in hash.
//! 3) Refresh verifies the presented refresh token, checks it against the
//!    ledger (the ledger's expiry wins), issues a new pair and rotates with a
//!    compare-and-swap on the consumed token so it can only be used once.

use super::{
    clock::Clock,
    credentials::{
        CreateOutcome, CredentialStore, PasswordError, Principal,
        compare_unknown_principal_password, normalize_email, valid_email,
    },
    ledger::{RefreshTokenLedger, RotateOutcome},
    token::{TokenCodec, TokenError, TokenPair, is_refresh_token},
};
use anyhow::Context;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("email adress is already registered")]
    EmailAlreadyRegistered,
    #[error("no principal registered for this email")]
    PrincipalNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid refresh token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error("token is not a refresh token")]
    WrongTokenKind,
    #[error("token subject is not a principal id")]
    InvalidSubject,
    #[error("refresh token is not the live token for this principal")]
    RefreshTokenNotFound,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct SessionManager {
    credentials: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            ledger,
            codec,
            clock,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Register a new principal.
    ///
    /// # Errors
    /// [`SessionError::Validation`] for a missing password or malformed email,
    /// [`SessionError::EmailAlreadyRegistered`] when the email is taken.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, SessionError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(SessionError::Validation(
                "email and password are required".to_string(),
            ));
        }
        if !valid_email(&email) {
            return Err(SessionError::Validation("email is not valid".to_string()));
        }

        if self.credentials.find_by_email(&email).await?.is_some() {
            return Err(SessionError::EmailAlreadyRegistered);
        }

        match self.credentials.create(&email, password).await? {
            CreateOutcome::Created(principal) => {
                info!(principal_id = %principal.id, "principal signed up");
                Ok(principal)
            }
            CreateOutcome::Conflict => Err(SessionError::EmailAlreadyRegistered),
        }
    }

    /// Authenticate with email and password and start a new session.
    ///
    /// Any previous refresh token of the principal stops working.
    ///
    /// # Errors
    /// [`SessionError::PrincipalNotFound`] or [`SessionError::InvalidCredentials`]
    /// for bad credentials; [`SessionError::Internal`] if the ledger write fails.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<TokenPair, SessionError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(SessionError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let Some(principal) = self.credentials.find_by_email(&email).await? else {
            let candidate = password.to_string();
            let compared = tokio::task::spawn_blocking(move || {
                compare_unknown_principal_password(&candidate)
            })
            .await
            .context("password comparison task failed")?;
            if let Err(PasswordError::MalformedHash) = compared {
                debug!("unknown principal hash unavailable, skipped comparison");
            }
            return Err(SessionError::PrincipalNotFound);
        };

        let candidate = password.to_string();
        let checked = principal.clone();
        let compared = tokio::task::spawn_blocking(move || checked.compare_password(&candidate))
            .await
            .context("password comparison task failed")?;
        match compared {
            Ok(()) => {}
            Err(PasswordError::Mismatch) => return Err(SessionError::InvalidCredentials),
            Err(PasswordError::MalformedHash) => {
                return Err(SessionError::Internal(anyhow::anyhow!(
                    "stored password hash for principal {} is malformed",
                    principal.id
                )));
            }
        }

        let pair = self
            .codec
            .issue_pair(principal.id)
            .map_err(|err| SessionError::Internal(err.into()))?;
        match self.ledger.rotate(principal.id, None, &pair.refresh).await? {
            RotateOutcome::Rotated(_) => {}
            RotateOutcome::Superseded => {
                return Err(SessionError::Internal(anyhow::anyhow!(
                    "unconditional rotation reported superseded"
                )));
            }
        }

        info!(principal_id = %principal.id, "principal signed in");
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair. The presented token is consumed.
    ///
    /// # Errors
    /// Every failure except [`SessionError::Internal`] means the caller is unauthorized.
    pub async fn refresh(&self, refresh_raw: &str) -> Result<TokenPair, SessionError> {
        if refresh_raw.is_empty() {
            return Err(SessionError::Validation(
                "refresh_token is required".to_string(),
            ));
        }

        let token = self.codec.parse(refresh_raw)?;
        if !is_refresh_token(&token) {
            return Err(SessionError::WrongTokenKind);
        }
        let principal_id = token
            .claims
            .principal_id()
            .ok_or(SessionError::InvalidSubject)?;

        let record = self
            .ledger
            .find_by_principal_and_token(principal_id, refresh_raw)
            .await?
            .ok_or(SessionError::RefreshTokenNotFound)?;

        if record.expires_at_unix <= self.clock.now_unix() {
            return Err(SessionError::RefreshTokenExpired);
        }

        let pair = self
            .codec
            .issue_pair(principal_id)
            .map_err(|err| SessionError::Internal(err.into()))?;
        match self
            .ledger
            .rotate(principal_id, Some(refresh_raw), &pair.refresh)
            .await?
        {
            RotateOutcome::Rotated(_) => {
                debug!(%principal_id, "refresh token rotated");
                Ok(pair)
            }
            // Lost a race with another refresh of the same token.
            RotateOutcome::Superseded => Err(SessionError::RefreshTokenNotFound),
        }
    }

    /// Revoke every refresh token of the principal.
    ///
    /// # Errors
    /// Returns [`SessionError::Internal`] if the ledger cannot be updated.
    pub async fn sign_out(&self, principal_id: Uuid) -> Result<(), SessionError> {
        let revoked = self.ledger.revoke_all_for_principal(principal_id).await?;
        info!(%principal_id, revoked, "principal signed out");
        Ok(())
    }
}
