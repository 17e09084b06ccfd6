//! Principals and the store that owns their credentials.
//!
//! Passwords are hashed with argon2 (PHC string format) and only ever compared
//! through [`Principal::compare_password`]. Emails are normalized before they
//! reach the store so uniqueness is case-insensitive.

use super::roles::Roles;
use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use regex::Regex;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::fmt;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password does not match")]
    Mismatch,
    #[error("stored password hash is not a valid PHC string")]
    MalformedHash,
}

/// Hash a password into a PHC string with a random salt.
///
/// # Errors
/// Returns an error if argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Stand-in hash compared against when the email is unknown, so both sign-in
/// failures cost one argon2 verification.
static UNKNOWN_PRINCIPAL_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password(&ulid::Ulid::new().to_string()).ok());

/// Run a password verification that always fails against a throwaway hash.
pub fn compare_unknown_principal_password(candidate: &str) -> Result<(), PasswordError> {
    let hash = UNKNOWN_PRINCIPAL_HASH
        .as_deref()
        .ok_or(PasswordError::MalformedHash)?;
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::MalformedHash)?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Err(argon2::password_hash::Error::Password) | Ok(()) => Err(PasswordError::Mismatch),
        Err(_) => Err(PasswordError::MalformedHash),
    }
}

#[derive(Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub roles: Roles,
    pub created_at_unix: i64,
    password_hash: String,
}

impl Principal {
    #[must_use]
    pub fn new(
        id: Uuid,
        email: String,
        password_hash: String,
        roles: Roles,
        created_at_unix: i64,
    ) -> Self {
        Self {
            id,
            email,
            roles,
            created_at_unix,
            password_hash,
        }
    }

    /// Constant-time comparison of `candidate` against the stored hash.
    ///
    /// # Errors
    /// [`PasswordError::Mismatch`] on a wrong password, [`PasswordError::MalformedHash`]
    /// if the stored hash cannot be parsed.
    pub fn compare_password(&self, candidate: &str) -> Result<(), PasswordError> {
        let parsed =
            PasswordHash::new(&self.password_hash).map_err(|_| PasswordError::MalformedHash)?;

        match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(argon2::password_hash::Error::Password) => Err(PasswordError::Mismatch),
            Err(_) => Err(PasswordError::MalformedHash),
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .field("created_at_unix", &self.created_at_unix)
            .field("password_hash", &"***")
            .finish()
    }
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(Principal),
    Conflict,
}

/// Lookup and registration of principals.
///
/// `email` arguments are expected to be normalized already.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>>;

    /// Hash `password` and insert a principal with the default roles.
    /// A concurrent insert of the same email yields [`CreateOutcome::Conflict`].
    async fn create(&self, email: &str, password: &str) -> Result<CreateOutcome>;

    async fn update_roles(&self, id: Uuid, roles: Roles) -> Result<Option<Principal>>;
}

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PRINCIPAL_COLUMNS: &str = r"
    id,
    email,
    hashed_password,
    roles,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix
";

fn principal_from_row(row: &PgRow) -> Principal {
    Principal::new(
        row.get("id"),
        row.get("email"),
        row.get("hashed_password"),
        Roles::from_column(row.get("roles")),
        row.get("created_at_unix"),
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code == "23505"),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;

        Ok(row.as_ref().map(principal_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;

        Ok(row.as_ref().map(principal_from_row))
    }

    async fn create(&self, email: &str, password: &str) -> Result<CreateOutcome> {
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .context("password hashing task failed")??;

        let query = format!(
            r"
            INSERT INTO users (id, email, hashed_password, roles)
            VALUES ($1, $2, $3, $4)
            RETURNING {PRINCIPAL_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(email)
            .bind(password_hash)
            .bind(Roles::DEFAULT.to_column())
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(CreateOutcome::Created(principal_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn update_roles(&self, id: Uuid, roles: Roles) -> Result<Option<Principal>> {
        let query =
            format!("UPDATE users SET roles = $2 WHERE id = $1 RETURNING {PRINCIPAL_COLUMNS}");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(roles.to_column())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user roles")?;

        Ok(row.as_ref().map(principal_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal_with_password(password: &str) -> Result<Principal> {
        Ok(Principal::new(
            Uuid::new_v4(),
            "a@x.com".to_string(),
            hash_password(password)?,
            Roles::DEFAULT,
            0,
        ))
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@x.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email(""));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("two words@x.com"));
    }

    #[test]
    fn unknown_principal_password_never_matches() {
        for candidate in ["", "pw", "correct horse battery staple"] {
            assert_eq!(
                compare_unknown_principal_password(candidate),
                Err(PasswordError::Mismatch)
            );
        }
    }

    #[test]
    fn compare_password_accepts_only_the_original() -> Result<()> {
        let principal = principal_with_password("pw")?;
        assert_eq!(principal.compare_password("pw"), Ok(()));
        assert_eq!(
            principal.compare_password("wrong"),
            Err(PasswordError::Mismatch)
        );
        assert_eq!(principal.compare_password(""), Err(PasswordError::Mismatch));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        assert_ne!(hash_password("pw")?, hash_password("pw")?);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_reported() {
        let principal = Principal::new(
            Uuid::new_v4(),
            "a@x.com".to_string(),
            "plaintext".to_string(),
            Roles::DEFAULT,
            0,
        );
        assert_eq!(
            principal.compare_password("plaintext"),
            Err(PasswordError::MalformedHash)
        );
    }

    #[test]
    fn debug_hides_password_hash() -> Result<()> {
        let principal = principal_with_password("pw")?;
        let rendered = format!("{principal:?}");
        assert!(!rendered.contains("argon2"));
        assert!(rendered.contains("a@x.com"));
        Ok(())
    }
}
