//! Server-side refresh token state.
//!
//! Only a SHA-256 hash of the raw refresh token is stored, one live row per
//! principal. Lookups match on (principal, hash), so a token that has been
//! superseded by a later rotation is simply not found.

use super::token::SignedToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub principal_id: Uuid,
    pub hashed_token: Vec<u8>,
    pub created_at_unix: i64,
    pub expires_at_unix: i64,
}

#[derive(Debug)]
pub enum RotateOutcome {
    Rotated(RefreshTokenRecord),
    /// The consumed token was no longer the live one; nothing was written.
    Superseded,
}

/// Hash the exact wire bytes of a refresh token.
#[must_use]
pub fn hash_refresh_token(raw: &str) -> Vec<u8> {
    Sha256::digest(raw.as_bytes()).to_vec()
}

#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Store `token` as the live refresh token for `principal_id`, replacing any previous one.
    async fn create(&self, principal_id: Uuid, token: &SignedToken) -> Result<RefreshTokenRecord>;

    async fn find_by_principal_and_token(
        &self,
        principal_id: Uuid,
        raw: &str,
    ) -> Result<Option<RefreshTokenRecord>>;

    /// Returns the number of records removed.
    async fn revoke_all_for_principal(&self, principal_id: Uuid) -> Result<u64>;

    /// Revoke and create as one atomic unit.
    ///
    /// When `consumed` is given, the revoke only goes through if that token is
    /// still the live one; otherwise [`RotateOutcome::Superseded`] is returned
    /// and the ledger is left untouched.
    async fn rotate(
        &self,
        principal_id: Uuid,
        consumed: Option<&str>,
        issued: &SignedToken,
    ) -> Result<RotateOutcome>;
}

#[derive(Clone, Debug)]
pub struct PgRefreshTokenLedger {
    pool: PgPool,
}

impl PgRefreshTokenLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = r"
    user_id,
    hashed_token,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
    EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix
";

fn record_from_row(row: &PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        principal_id: row.get("user_id"),
        hashed_token: row.get("hashed_token"),
        created_at_unix: row.get("created_at_unix"),
        expires_at_unix: row.get("expires_at_unix"),
    }
}

async fn upsert_record<'e, E: PgExecutor<'e>>(
    executor: E,
    principal_id: Uuid,
    token: &SignedToken,
) -> Result<RefreshTokenRecord> {
    let query = format!(
        r"
        INSERT INTO refresh_tokens (user_id, hashed_token, expires_at)
        VALUES ($1, $2, to_timestamp($3::float8))
        ON CONFLICT (user_id) DO UPDATE
            SET hashed_token = EXCLUDED.hashed_token,
                created_at = NOW(),
                expires_at = EXCLUDED.expires_at
        RETURNING {RECORD_COLUMNS}
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(principal_id)
        .bind(hash_refresh_token(&token.raw))
        .bind(token.claims.exp)
        .fetch_one(executor)
        .instrument(span)
        .await
        .context("failed to store refresh token")?;

    Ok(record_from_row(&row))
}

async fn delete_all<'e, E: PgExecutor<'e>>(executor: E, principal_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to revoke refresh tokens")?;

    Ok(result.rows_affected())
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokenLedger {
    async fn create(&self, principal_id: Uuid, token: &SignedToken) -> Result<RefreshTokenRecord> {
        upsert_record(&self.pool, principal_id, token).await
    }

    async fn find_by_principal_and_token(
        &self,
        principal_id: Uuid,
        raw: &str,
    ) -> Result<Option<RefreshTokenRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE user_id = $1 AND hashed_token = $2"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(principal_id)
            .bind(hash_refresh_token(raw))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token")?;

        Ok(row.as_ref().map(record_from_row))
    }

    async fn revoke_all_for_principal(&self, principal_id: Uuid) -> Result<u64> {
        delete_all(&self.pool, principal_id).await
    }

    async fn rotate(
        &self,
        principal_id: Uuid,
        consumed: Option<&str>,
        issued: &SignedToken,
    ) -> Result<RotateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin refresh token rotation")?;

        if let Some(raw) = consumed {
            // A concurrent rotation holding the row makes this wait, then match nothing.
            let query = "DELETE FROM refresh_tokens WHERE user_id = $1 AND hashed_token = $2";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(principal_id)
                .bind(hash_refresh_token(raw))
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to consume refresh token")?;

            if result.rows_affected() == 0 {
                if let Err(err) = tx.rollback().await {
                    warn!(%principal_id, "failed to roll back superseded rotation: {err}");
                }
                return Ok(RotateOutcome::Superseded);
            }
        } else {
            delete_all(&mut *tx, principal_id).await?;
        }

        let record = upsert_record(&mut *tx, principal_id, issued).await?;

        tx.commit()
            .await
            .context("commit refresh token rotation")?;

        Ok(RotateOutcome::Rotated(record))
    }
}
