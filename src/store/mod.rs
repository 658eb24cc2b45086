/// Persistence
///
/// All mutable state lives behind a `Store`. Work happens inside a
/// transaction obtained from `Store::begin`; the transaction exposes every
/// repository and is rolled back when dropped without `commit`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::auth::{Purpose, RefreshTokenRecord, SingleUseToken};
use crate::error::AppError;

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Accounts and the roles they carry
#[async_trait]
pub trait AccountRepository: Send {
    /// `email` must already be normalized. Account lookups lock the row
    /// until the transaction ends.
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, AppError>;

    async fn find_account_by_id(&mut self, id: Uuid) -> Result<Option<Account>, AppError>;

    async fn account_exists(&mut self, email: &str) -> Result<bool, AppError>;

    /// Upsert keyed by id, role memberships included. A second account with
    /// the same email fails with `Conflict(EmailTaken)`.
    async fn save_account(&mut self, account: &Account) -> Result<(), AppError>;

    async fn find_role_by_code(&mut self, code: &str) -> Result<Option<Role>, AppError>;

    /// Returns `false` if a role with that code already exists
    async fn insert_role(&mut self, role: &Role) -> Result<bool, AppError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send {
    async fn insert_refresh_token(&mut self, record: &RefreshTokenRecord) -> Result<(), AppError>;

    /// Looks up a record and locks it for the rest of the transaction. A
    /// caller that waited on the lock sees the committed state.
    async fn find_refresh_token_for_update(
        &mut self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Revokes `jti` and links it to `replaced_by`. Returns `false` if the
    /// record was already revoked.
    async fn mark_refresh_token_replaced(
        &mut self,
        jti: &str,
        replaced_by: &str,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait SingleUseTokenRepository: Send {
    /// Returns the number of rows removed
    async fn delete_single_use_tokens(&mut self, email: &str, purpose: Purpose)
        -> Result<u64, AppError>;

    /// Replaces any code already stored for the token's (email, purpose)
    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), AppError>;

    /// Latest code for (email, purpose), locked until the transaction ends
    async fn find_single_use_token(
        &mut self,
        email: &str,
        purpose: Purpose,
    ) -> Result<Option<SingleUseToken>, AppError>;
}

#[async_trait]
pub trait StoreTransaction:
    AccountRepository + RefreshTokenRepository + SingleUseTokenRepository
{
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError>;
}
