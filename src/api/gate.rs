//! Request gate: authentication and role checks in front of every handler.
//!
//! Flow Overview:
//! 1) Public prefixes (`/api/auth`, `/health`) pass straight through.
//! 2) Authentication: the `Authorization` header must be exactly
//!    `Bearer <token>`. The token must verify, be an access token and carry
//!    a principal id that still resolves in the credential store.
//! 3) Authorization: paths under a role-protected prefix require that role.
//! 4) The principal is inserted into the request extensions for handlers.
//!
//! Every failure before step 4 short-circuits; the handler never runs.

use super::error::ApiError;
use crate::session::{
    CredentialStore, Principal, Role, TokenCodec,
    token::{TokenError, is_access_token},
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{fmt, sync::Arc};
use tracing::{Span, debug, error};

pub const AUTH_PREFIX: &str = "/api/auth";
pub const HEALTH_PATH: &str = "/health";
pub const DEFAULT_ADMIN_PREFIX: &str = "/api/admin";

/// Path prefix that requires a role on top of authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleRule {
    pub prefix: String,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    public_prefixes: Vec<String>,
    role_rules: Vec<RoleRule>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            public_prefixes: vec![AUTH_PREFIX.to_string(), HEALTH_PATH.to_string()],
            role_rules: vec![RoleRule {
                prefix: DEFAULT_ADMIN_PREFIX.to_string(),
                role: Role::Admin,
            }],
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add admin-only prefixes. `/api/admin` always stays admin-only.
    #[must_use]
    pub fn with_admin_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for prefix in prefixes {
            let prefix = prefix.into();
            let known = self
                .role_rules
                .iter()
                .any(|rule| rule.role == Role::Admin && rule.prefix == prefix);
            if !known {
                self.role_rules.push(RoleRule {
                    prefix,
                    role: Role::Admin,
                });
            }
        }
        self
    }

    #[must_use]
    pub fn with_role_rule(mut self, prefix: impl Into<String>, role: Role) -> Self {
        self.role_rules.push(RoleRule {
            prefix: prefix.into(),
            role,
        });
        self
    }

    #[must_use]
    pub fn role_rules(&self) -> &[RoleRule] {
        &self.role_rules
    }

    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path_has_prefix(path, prefix))
    }

    /// Roles required for `path`; all of them must be present.
    pub fn required_roles<'a>(&'a self, path: &'a str) -> impl Iterator<Item = Role> + 'a {
        self.role_rules
            .iter()
            .filter(move |rule| path_has_prefix(path, &rule.prefix))
            .map(|rule| rule.role)
    }
}

/// Segment-aware prefix match: `/api/admin` matches `/api/admin/x`, not `/api/administrator`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Extract the bearer credential; anything but `<scheme> <token>` is treated as absent.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    let (Some(scheme), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

pub struct RequestGate {
    codec: Arc<TokenCodec>,
    credentials: Arc<dyn CredentialStore>,
    config: GateConfig,
}

impl RequestGate {
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        credentials: Arc<dyn CredentialStore>,
        config: GateConfig,
    ) -> Self {
        Self {
            codec,
            credentials,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Resolve the principal behind the request's access token.
    ///
    /// # Errors
    /// [`ApiError::Unauthorized`] for any missing, invalid or unresolvable credential,
    /// including a credential store failure (logged at error level).
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let raw = extract_bearer_token(headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let token = self.codec.parse(raw).map_err(|err| match err {
            TokenError::Signing(_) => ApiError::Internal(err.into()),
            _ => ApiError::Unauthorized(err.to_string()),
        })?;

        if !is_access_token(&token) {
            return Err(ApiError::Unauthorized(
                "providing refresh tokens is not permitted".to_string(),
            ));
        }

        let principal_id = token
            .claims
            .principal_id()
            .ok_or_else(|| {
                ApiError::Unauthorized("token subject is not a principal id".to_string())
            })?;

        match self.credentials.find_by_id(principal_id).await {
            Ok(Some(principal)) => Ok(principal),
            Ok(None) => Err(ApiError::Unauthorized(
                "principal no longer exists".to_string(),
            )),
            Err(err) => {
                error!(%principal_id, "failed to load principal: {err:#}");
                Err(ApiError::Unauthorized(
                    "principal could not be loaded".to_string(),
                ))
            }
        }
    }

    /// # Errors
    /// [`ApiError::Forbidden`] when `path` needs a role the principal lacks.
    pub fn authorize(&self, path: &str, principal: &Principal) -> Result<(), ApiError> {
        match self
            .config
            .required_roles(path)
            .find(|role| !principal.roles.contains(*role))
        {
            Some(role) => Err(ApiError::Forbidden(format!("{role} role required"))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// axum middleware running both gate stages.
pub async fn enforce(
    State(gate): State<Arc<RequestGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if gate.config.is_public(&path) {
        return next.run(request).await;
    }

    let principal = match gate.authenticate(request.headers()).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = gate.authorize(&path, &principal) {
        return err.into_response();
    }

    Span::current().record("principal_id", tracing::field::display(principal.id));
    debug!(principal_id = %principal.id, "request authorized");

    request.extensions_mut().insert(principal);
    next.run(request).await
}
