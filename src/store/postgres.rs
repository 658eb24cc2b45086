/// Postgres store
///
/// Transactions run at READ COMMITTED. Every row that is read and then
/// written back (accounts, refresh records, single-use codes) is fetched
/// with `FOR UPDATE`, so a concurrent writer waits and then sees the
/// committed row. Unique constraints settle the insert races: a second
/// account with the same email fails on `accounts_email_key`, a second role
/// with the same code is skipped, a second code for one (email, purpose)
/// replaces the first.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    AccountRepository, RefreshTokenRepository, SingleUseTokenRepository, Store, StoreTransaction,
};
use crate::account::{Account, AccountStatus, Role};
use crate::auth::{Purpose, RefreshTokenRecord, SingleUseToken};
use crate::configuration::DatabaseSettings;
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.connection_string())
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::UnexpectedError(format!("Migration failed: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn roles_of(&mut self, account_id: Uuid) -> Result<Vec<Role>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.code, r.name
            FROM roles r
            JOIN account_roles ar ON ar.role_id = r.id
            WHERE ar.account_id = $1
            ORDER BY r.code
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut self.tx)
        .await?;

        rows.iter().map(role_from_row).collect()
    }

    async fn with_roles(&mut self, row: Option<PgRow>) -> Result<Option<Account>, AppError> {
        match row {
            None => Ok(None),
            Some(row) => {
                let mut account = account_from_row(&row)?;
                account.roles = self.roles_of(account.id).await?;
                Ok(Some(account))
            }
        }
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, name, status, email_verified_at, created_at, updated_at";

fn account_from_row(row: &PgRow) -> Result<Account, AppError> {
    let status: String = row.try_get("status")?;
    let status = AccountStatus::parse(&status).ok_or_else(|| {
        DatabaseError::UnexpectedError(format!("unknown account status {}", status))
    })?;

    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        status,
        roles: Vec::new(),
        email_verified_at: row.try_get("email_verified_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, AppError> {
    Ok(Role {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<RefreshTokenRecord, AppError> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        jti: row.try_get("jti")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        replaced_by_jti: row.try_get("replaced_by_jti")?,
    })
}

fn single_use_token_from_row(row: &PgRow) -> Result<SingleUseToken, AppError> {
    let purpose: String = row.try_get("purpose")?;
    let purpose = Purpose::parse(&purpose).ok_or_else(|| {
        DatabaseError::UnexpectedError(format!("unknown token purpose {}", purpose))
    })?;

    Ok(SingleUseToken {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        token_hash: row.try_get("token_hash")?,
        purpose,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl AccountRepository for PgTransaction {
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE email = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut self.tx)
        .await?;

        self.with_roles(row).await
    }

    async fn find_account_by_id(&mut self, id: Uuid) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut self.tx)
        .await?;

        self.with_roles(row).await
    }

    async fn account_exists(&mut self, email: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE email = $1)")
            .bind(email)
            .fetch_one(&mut self.tx)
            .await?;
        Ok(exists)
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, email, password_hash, name, status, email_verified_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                email_verified_at = EXCLUDED.email_verified_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.name)
        .bind(account.status.as_str())
        .bind(account.email_verified_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut self.tx)
        .await?;

        let role_ids: Vec<Uuid> = account.roles.iter().map(|r| r.id).collect();

        sqlx::query("DELETE FROM account_roles WHERE account_id = $1 AND NOT (role_id = ANY($2))")
            .bind(account.id)
            .bind(&role_ids)
            .execute(&mut self.tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO account_roles (account_id, role_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account.id)
        .bind(&role_ids)
        .execute(&mut self.tx)
        .await?;

        Ok(())
    }

    async fn find_role_by_code(&mut self, code: &str) -> Result<Option<Role>, AppError> {
        let row = sqlx::query("SELECT id, code, name FROM roles WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut self.tx)
            .await?;

        row.as_ref().map(role_from_row).transpose()
    }

    async fn insert_role(&mut self, role: &Role) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO roles (id, code, name) VALUES ($1, $2, $3) ON CONFLICT (code) DO NOTHING",
        )
        .bind(role.id)
        .bind(&role.code)
        .bind(&role.name)
        .execute(&mut self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgTransaction {
    async fn insert_refresh_token(&mut self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (id, account_id, jti, issued_at, expires_at, revoked, replaced_by_jti)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.jti)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(&record.replaced_by_jti)
        .execute(&mut self.tx)
        .await?;

        Ok(())
    }

    async fn find_refresh_token_for_update(
        &mut self,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, jti, issued_at, expires_at, revoked, replaced_by_jti
            FROM refresh_tokens
            WHERE jti = $1
            FOR UPDATE
            "#,
        )
        .bind(jti)
        .fetch_optional(&mut self.tx)
        .await?;

        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn mark_refresh_token_replaced(
        &mut self,
        jti: &str,
        replaced_by: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, replaced_by_jti = $2
            WHERE jti = $1 AND revoked = false
            "#,
        )
        .bind(jti)
        .bind(replaced_by)
        .execute(&mut self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SingleUseTokenRepository for PgTransaction {
    async fn delete_single_use_tokens(
        &mut self,
        email: &str,
        purpose: Purpose,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM single_use_tokens WHERE email = $1 AND purpose = $2")
            .bind(email)
            .bind(purpose.as_str())
            .execute(&mut self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO single_use_tokens (id, email, token_hash, purpose, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT single_use_tokens_email_purpose_key DO UPDATE SET
                id = EXCLUDED.id,
                token_hash = EXCLUDED.token_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(token.id)
        .bind(&token.email)
        .bind(&token.token_hash)
        .bind(token.purpose.as_str())
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut self.tx)
        .await?;

        Ok(())
    }

    async fn find_single_use_token(
        &mut self,
        email: &str,
        purpose: Purpose,
    ) -> Result<Option<SingleUseToken>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, token_hash, purpose, created_at, expires_at
            FROM single_use_tokens
            WHERE email = $1 AND purpose = $2
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&mut self.tx)
        .await?;

        row.as_ref().map(single_use_token_from_row).transpose()
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
