//! In-memory stores used by unit and router tests.

use super::{
    credentials::{CreateOutcome, CredentialStore, Principal, hash_password},
    ledger::{RefreshTokenLedger, RefreshTokenRecord, RotateOutcome, hash_refresh_token},
    roles::Roles,
    token::SignedToken,
};
use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Mutex};
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct MemoryCredentialStore {
    users: Mutex<HashMap<Uuid, Principal>>,
}

impl MemoryCredentialStore {
    pub(crate) fn insert(&self, principal: Principal) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(principal.id, principal);
        }
    }

    pub(crate) fn remove(&self, id: Uuid) {
        if let Ok(mut users) = self.users.lock() {
            users.remove(&id);
        }
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn create(&self, email: &str, password: &str) -> Result<CreateOutcome> {
        let password_hash = hash_password(password)?;
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        if users.values().any(|user| user.email == email) {
            return Ok(CreateOutcome::Conflict);
        }
        let principal = Principal::new(
            Uuid::now_v7(),
            email.to_string(),
            password_hash,
            Roles::DEFAULT,
            0,
        );
        users.insert(principal.id, principal.clone());
        Ok(CreateOutcome::Created(principal))
    }

    async fn update_roles(&self, id: Uuid, roles: Roles) -> Result<Option<Principal>> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users.get_mut(&id).map(|user| {
            user.roles = roles;
            user.clone()
        }))
    }
}

/// Keyed by principal, so a second record replaces the first.
#[derive(Debug, Default)]
pub(crate) struct MemoryLedger {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryLedger {
    pub(crate) fn set_expiry(&self, principal_id: Uuid, expires_at_unix: i64) {
        if let Ok(mut records) = self.records.lock()
            && let Some(record) = records.get_mut(&principal_id)
        {
            record.expires_at_unix = expires_at_unix;
        }
    }

    fn record(principal_id: Uuid, token: &SignedToken) -> RefreshTokenRecord {
        RefreshTokenRecord {
            principal_id,
            hashed_token: hash_refresh_token(&token.raw),
            created_at_unix: token.claims.iat,
            expires_at_unix: token.claims.exp,
        }
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryLedger {
    async fn create(&self, principal_id: Uuid, token: &SignedToken) -> Result<RefreshTokenRecord> {
        let record = Self::record(principal_id, token);
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        records.insert(principal_id, record.clone());
        Ok(record)
    }

    async fn find_by_principal_and_token(
        &self,
        principal_id: Uuid,
        raw: &str,
    ) -> Result<Option<RefreshTokenRecord>> {
        let hashed = hash_refresh_token(raw);
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records
            .get(&principal_id)
            .filter(|record| record.hashed_token == hashed)
            .cloned())
    }

    async fn revoke_all_for_principal(&self, principal_id: Uuid) -> Result<u64> {
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        Ok(u64::from(records.remove(&principal_id).is_some()))
    }

    async fn rotate(
        &self,
        principal_id: Uuid,
        consumed: Option<&str>,
        issued: &SignedToken,
    ) -> Result<RotateOutcome> {
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        if let Some(raw) = consumed {
            let hashed = hash_refresh_token(raw);
            let live = records
                .get(&principal_id)
                .is_some_and(|record| record.hashed_token == hashed);
            if !live {
                return Ok(RotateOutcome::Superseded);
            }
        }
        let record = Self::record(principal_id, issued);
        records.insert(principal_id, record.clone());
        Ok(RotateOutcome::Rotated(record))
    }
}
