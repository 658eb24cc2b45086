/// Authentication Service
///
/// Orchestrates registration, login, refresh token rotation and the
/// verification / password reset flows. Every multi-step mutation runs in one
/// store transaction; mail and events go out only after it commits.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::account::{Account, AccountProfile, Role, DEFAULT_ROLE_CODE, DEFAULT_ROLE_NAME};
use crate::auth::jwt::TokenCodec;
use crate::auth::password::{BcryptHasher, PasswordHasher};
use crate::auth::refresh_token::{self, RefreshTokenRecord};
use crate::auth::single_use::{self, generate_code, Purpose, Redemption};
use crate::clock::{Clock, SystemClock};
use crate::configuration::{AccountSettings, Settings};
use crate::context::RequestContext;
use crate::email_client::{EmailMessage, MailDispatcher};
use crate::error::{AppError, AuthError, ConflictError};
use crate::events::{AccountCreated, EventPublisher};
use crate::store::{AccountRepository, Store, StoreTransaction};
use crate::telemetry::mask_email;
use crate::validators::{is_valid_email, is_valid_name, is_valid_password, normalize_email};

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Access and refresh token handed out by login and refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Caller identity established from a valid access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub roles: Vec<String>,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn MailDispatcher>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    codec: TokenCodec,
    settings: Settings,
}

impl AuthService {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn Store>,
        mailer: Arc<dyn MailDispatcher>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store,
            hasher: Arc::new(BcryptHasher::new(settings.account.bcrypt_cost)),
            mailer,
            events,
            codec: TokenCodec::new(&settings.jwt, clock.clone()),
            clock,
            settings: settings.clone(),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replaces the time source, for the codec as well
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.codec = TokenCodec::new(&self.settings.jwt, clock.clone());
        self.clock = clock;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn account_settings(&self) -> &AccountSettings {
        &self.settings.account
    }

    /// Creates a PENDING account carrying the default role.
    ///
    /// # Errors
    /// * `Validation` for a malformed email, empty name or password outside 8..=128 characters
    /// * `Conflict(EmailTaken)` when the email is already registered
    pub async fn register(
        &self,
        ctx: &RequestContext,
        input: RegisterInput,
    ) -> Result<AccountProfile, AppError> {
        let email = is_valid_email(&input.email)?;
        let name = is_valid_name(&input.name)?;
        is_valid_password(&input.password)?;

        let password_hash = self.hasher.hash(&input.password)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        if tx.account_exists(&email).await? {
            tracing::info!(
                request_id = %ctx.request_id,
                email = %mask_email(&email),
                "Registration rejected: email already registered"
            );
            return Err(ConflictError::EmailTaken.into());
        }

        let role = default_role(&mut *tx).await?;
        let account = Account::register(email, password_hash, name, role, now);
        tx.save_account(&account).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %ctx.request_id,
            account_id = %account.id,
            email = %mask_email(&account.email),
            "Account registered"
        );

        self.events.publish(AccountCreated::new(
            account.id,
            &account.email,
            account.created_at,
            &ctx.request_id,
            now,
        ));

        Ok(account.profile())
    }

    /// Checks credentials and issues a token pair.
    ///
    /// Unknown email and wrong password fail identically.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, AppError> {
        let email = normalize_email(email);
        let now = self.clock.now();

        // No store lock may be held across the bcrypt check
        let found = self.store.begin().await?.find_account_by_email(&email).await?;
        let account = match found {
            Some(account) => account,
            None => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    email = %mask_email(&email),
                    "Login failed: unknown email"
                );
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.hasher.matches(password, &account.password_hash)? {
            tracing::warn!(
                request_id = %ctx.request_id,
                account_id = %account.id,
                "Login failed: password mismatch"
            );
            return Err(AuthError::InvalidCredentials.into());
        }

        if !account.is_active() {
            tracing::warn!(
                request_id = %ctx.request_id,
                account_id = %account.id,
                status = %account.status,
                "Login refused: account not active"
            );
            return Err(AuthError::AccountNotActive.into());
        }

        let record = RefreshTokenRecord::issue(account.id, now, self.codec.refresh_ttl());
        let mut tx = self.store.begin().await?;
        refresh_token::record_issued(&mut *tx, &record).await?;
        let pair = self.token_pair(&account, &record.jti)?;
        tx.commit().await?;

        tracing::info!(
            request_id = %ctx.request_id,
            account_id = %account.id,
            "Login succeeded"
        );

        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair, revoking the presented one.
    pub async fn refresh_access_token(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> Result<TokenPair, AppError> {
        let claims = self
            .codec
            .validate(refresh_token)
            .map_err(|_| AuthError::InvalidRefreshToken)?;
        let jti = claims.jti.as_deref().ok_or(AuthError::InvalidRefreshToken)?;
        let subject = claims.account_id().ok_or(AuthError::InvalidRefreshToken)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let rotation =
            refresh_token::rotate(&mut *tx, jti, subject, now, self.codec.refresh_ttl()).await?;

        let account = tx
            .find_account_by_id(rotation.account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let pair = self.token_pair(&account, &rotation.successor.jti)?;
        tx.commit().await?;

        tracing::info!(
            request_id = %ctx.request_id,
            account_id = %account.id,
            "Refresh token rotated"
        );

        Ok(pair)
    }

    /// Issues a fresh VERIFY code for `email` and mails it
    pub async fn send_verification_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<(), AppError> {
        let email = is_valid_email(email)?;
        self.issue_code(ctx, &email, Purpose::Verify).await
    }

    /// Activates the account once the VERIFY code matches.
    ///
    /// # Errors
    /// * `InvalidCode(Verify)` when no code is live or the value differs
    /// * `CodeExpired(Verify)` when the code is past expiry; the code is deleted
    pub async fn verify_email(
        &self,
        ctx: &RequestContext,
        email: &str,
        code: &str,
    ) -> Result<(), AppError> {
        let email = normalize_email(email);
        let now = self.clock.now();

        let mut tx = self.redeem(ctx, &email, Purpose::Verify, code).await?;
        match tx.find_account_by_email(&email).await? {
            Some(mut account) => {
                account.activate(now);
                tx.save_account(&account).await?;
                tracing::info!(
                    request_id = %ctx.request_id,
                    account_id = %account.id,
                    "Email verified"
                );
            }
            None => tracing::info!(
                request_id = %ctx.request_id,
                email = %mask_email(&email),
                "Verification code redeemed for unregistered email"
            ),
        }
        tx.commit().await
    }

    /// Issues a fresh RESET code for `email` and mails it
    pub async fn request_password_reset(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<(), AppError> {
        let email = is_valid_email(email)?;
        self.issue_code(ctx, &email, Purpose::Reset).await
    }

    /// Replaces the password once the RESET code matches. Fails like `verify_email`.
    pub async fn perform_password_reset(
        &self,
        ctx: &RequestContext,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        is_valid_password(new_password)?;
        let email = normalize_email(email);
        let password_hash = self.hasher.hash(new_password)?;
        let now = self.clock.now();

        let mut tx = self.redeem(ctx, &email, Purpose::Reset, token).await?;
        match tx.find_account_by_email(&email).await? {
            Some(mut account) => {
                account.change_password_hash(password_hash, now);
                tx.save_account(&account).await?;
                tracing::info!(
                    request_id = %ctx.request_id,
                    account_id = %account.id,
                    "Password reset"
                );
            }
            None => tracing::info!(
                request_id = %ctx.request_id,
                email = %mask_email(&email),
                "Reset code redeemed for unregistered email"
            ),
        }
        tx.commit().await
    }

    pub async fn profile(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
    ) -> Result<AccountProfile, AppError> {
        let mut tx = self.store.begin().await?;
        let account = tx.find_account_by_id(account_id).await?.ok_or_else(|| {
            tracing::warn!(request_id = %ctx.request_id, account_id = %account_id, "Profile lookup for missing account");
            AppError::NotFound("User not found".to_string())
        })?;
        Ok(account.profile())
    }

    pub async fn update_profile(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        name: &str,
    ) -> Result<AccountProfile, AppError> {
        let name = is_valid_name(name)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let mut account = tx
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        account.rename(name, now);
        tx.save_account(&account).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %ctx.request_id,
            account_id = %account_id,
            "Profile updated"
        );

        Ok(account.profile())
    }

    /// Resolves an access token to the caller's identity. Refresh tokens are refused.
    pub fn authenticate(&self, access_token: &str) -> Result<AuthenticatedUser, AppError> {
        let claims = self
            .codec
            .validate(access_token)
            .map_err(|_| AuthError::InvalidAccessToken)?;
        if claims.jti.is_some() {
            return Err(AuthError::InvalidAccessToken.into());
        }
        let account_id = claims.account_id().ok_or(AuthError::InvalidAccessToken)?;

        Ok(AuthenticatedUser {
            account_id,
            roles: claims.roles().to_vec(),
        })
    }

    fn token_pair(&self, account: &Account, jti: &str) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self
                .codec
                .issue_access_token(account.id, account.role_codes())?,
            refresh_token: self.codec.issue_refresh_token(account.id, jti)?,
            token_type: "Bearer".to_string(),
            expires_in: self.codec.access_ttl().num_seconds(),
        })
    }

    async fn issue_code(
        &self,
        ctx: &RequestContext,
        email: &str,
        purpose: Purpose,
    ) -> Result<(), AppError> {
        let settings = self.account_settings();
        let code = generate_code(settings.code_length);
        let ttl = chrono::Duration::seconds(settings.single_use_token_expiry);
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        single_use::issue(&mut *tx, email, purpose, &code, now, ttl).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %ctx.request_id,
            email = %mask_email(email),
            purpose = %purpose,
            "Single-use code issued"
        );

        self.mailer.dispatch(code_message(email, purpose, &code));
        Ok(())
    }

    /// Opens a transaction and redeems the code in it. On success the
    /// transaction is handed back with the code already deleted.
    async fn redeem(
        &self,
        ctx: &RequestContext,
        email: &str,
        purpose: Purpose,
        supplied: &str,
    ) -> Result<Box<dyn StoreTransaction>, AppError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        match single_use::consume(&mut *tx, email, purpose, supplied, now).await? {
            Redemption::Redeemed => Ok(tx),
            Redemption::Expired => {
                // Keep the deletion even though the attempt fails
                tx.commit().await?;
                tracing::info!(
                    request_id = %ctx.request_id,
                    email = %mask_email(email),
                    purpose = %purpose,
                    "Expired single-use code removed"
                );
                Err(AuthError::CodeExpired(purpose).into())
            }
            Redemption::Missing | Redemption::Mismatch => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    email = %mask_email(email),
                    purpose = %purpose,
                    "Single-use code rejected"
                );
                Err(AuthError::InvalidCode(purpose).into())
            }
        }
    }
}

/// Looks up the default role, creating it on first use. Losing an insert
/// race falls back to the row the winner wrote.
async fn default_role<R>(repo: &mut R) -> Result<Role, AppError>
where
    R: AccountRepository + ?Sized,
{
    if let Some(role) = repo.find_role_by_code(DEFAULT_ROLE_CODE).await? {
        return Ok(role);
    }

    let role = Role::new(DEFAULT_ROLE_CODE, DEFAULT_ROLE_NAME);
    if repo.insert_role(&role).await? {
        return Ok(role);
    }

    repo.find_role_by_code(DEFAULT_ROLE_CODE)
        .await?
        .ok_or_else(|| AppError::Internal("default role missing after insert".to_string()))
}

fn code_message(email: &str, purpose: Purpose, code: &str) -> EmailMessage {
    match purpose {
        Purpose::Verify => EmailMessage::new(
            email,
            "Verify your account",
            format!("Your verification code: {}", code),
        ),
        Purpose::Reset => EmailMessage::new(
            email,
            "Password reset",
            format!("Your password reset token: {}", code),
        ),
    }
}
