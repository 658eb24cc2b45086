/// In-process store
///
/// Backs the test suites and the `memory` storage backend. A transaction
/// holds the store lock for its whole life and works on a copy of the
/// state, which `commit` writes back. Dropping the transaction discards the
/// copy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    AccountRepository, RefreshTokenRepository, SingleUseTokenRepository, Store, StoreTransaction,
};
use crate::account::{Account, Role};
use crate::auth::{Purpose, RefreshTokenRecord, SingleUseToken};
use crate::error::{AppError, ConflictError, DatabaseError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    roles: HashMap<String, Role>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    single_use_tokens: Vec<SingleUseToken>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn account_by_email(&self, email: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.accounts.values().find(|a| a.email == email).cloned()
    }

    pub async fn refresh_token(&self, jti: &str) -> Option<RefreshTokenRecord> {
        self.state.lock().await.refresh_tokens.get(jti).cloned()
    }

    pub async fn refresh_tokens_for(&self, account_id: Uuid) -> Vec<RefreshTokenRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .refresh_tokens
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.issued_at);
        records
    }

    /// Number of stored codes for (email, purpose)
    pub async fn live_single_use_tokens(&self, email: &str, purpose: Purpose) -> usize {
        let state = self.state.lock().await;
        state
            .single_use_tokens
            .iter()
            .filter(|t| t.email == email && t.purpose == purpose)
            .count()
    }

    /// Moves a stored code's expiry, for exercising the expired path
    pub async fn expire_single_use_token(&self, email: &str, purpose: Purpose) {
        let mut state = self.state.lock().await;
        for token in state
            .single_use_tokens
            .iter_mut()
            .filter(|t| t.email == email && t.purpose == purpose)
        {
            token.expires_at = token.created_at;
        }
    }

    /// True while a transaction is open
    pub fn is_locked(&self) -> bool {
        self.state.try_lock().is_err()
    }

    pub async fn role_count(&self) -> usize {
        self.state.lock().await.roles.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl AccountRepository for MemoryTransaction {
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, AppError> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_account_by_id(&mut self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn account_exists(&mut self, email: &str) -> Result<bool, AppError> {
        Ok(self.working.accounts.values().any(|a| a.email == email))
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), AppError> {
        let taken = self
            .working
            .accounts
            .values()
            .any(|a| a.email == account.email && a.id != account.id);
        if taken {
            return Err(ConflictError::EmailTaken.into());
        }

        if let Some(role) = account
            .roles
            .iter()
            .find(|r| !self.working.roles.contains_key(&r.code))
        {
            return Err(DatabaseError::QueryExecution(format!("unknown role {}", role.code)).into());
        }

        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_role_by_code(&mut self, code: &str) -> Result<Option<Role>, AppError> {
        Ok(self.working.roles.get(code).cloned())
    }

    async fn insert_role(&mut self, role: &Role) -> Result<bool, AppError> {
        if self.working.roles.contains_key(&role.code) {
            return Ok(false);
        }
        self.working.roles.insert(role.code.clone(), role.clone());
        Ok(true)
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryTransaction {
    async fn insert_refresh_token(&mut self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        if self.working.refresh_tokens.contains_key(&record.jti) {
            return Err(DatabaseError::QueryExecution("duplicate refresh token jti".into()).into());
        }
        self.working
            .refresh_tokens
            .insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh_token_for_update(
        &mut self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self.working.refresh_tokens.get(jti).cloned())
    }

    async fn mark_refresh_token_replaced(
        &mut self,
        jti: &str,
        replaced_by: &str,
    ) -> Result<bool, AppError> {
        match self.working.refresh_tokens.get_mut(jti) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.replaced_by_jti = Some(replaced_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SingleUseTokenRepository for MemoryTransaction {
    async fn delete_single_use_tokens(
        &mut self,
        email: &str,
        purpose: Purpose,
    ) -> Result<u64, AppError> {
        let before = self.working.single_use_tokens.len();
        self.working
            .single_use_tokens
            .retain(|t| !(t.email == email && t.purpose == purpose));
        Ok((before - self.working.single_use_tokens.len()) as u64)
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), AppError> {
        self.working
            .single_use_tokens
            .retain(|t| !(t.email == token.email && t.purpose == token.purpose));
        self.working.single_use_tokens.push(token.clone());
        Ok(())
    }

    async fn find_single_use_token(
        &mut self,
        email: &str,
        purpose: Purpose,
    ) -> Result<Option<SingleUseToken>, AppError> {
        Ok(self
            .working
            .single_use_tokens
            .iter()
            .filter(|t| t.email == email && t.purpose == purpose)
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
