/// Refresh Token Ledger
///
/// Every refresh token handed out has a record here, keyed by the family
/// identifier (`jti`) embedded in the signed token. Records are never
/// deleted. Rotation flips the presented record to revoked, links it to its
/// successor and inserts the successor, all inside the caller's transaction.
///
/// Presenting an already rotated token is rejected because that record is
/// revoked. Its descendants stay valid.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::store::RefreshTokenRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    /// Family id of the record that replaced this one; written once
    pub replaced_by_jti: Option<String>,
}

impl RefreshTokenRecord {
    /// A fresh, unrevoked record with a newly generated family id
    pub fn issue(account_id: Uuid, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            jti: new_family_id(),
            issued_at: now,
            expires_at: now + ttl,
            revoked: false,
            replaced_by_jti: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Family ids are random v4 UUIDs and never reused
fn new_family_id() -> String {
    Uuid::new_v4().to_string()
}

/// Result of a successful rotation
#[derive(Debug, Clone)]
pub struct Rotation {
    pub account_id: Uuid,
    pub previous_jti: String,
    pub successor: RefreshTokenRecord,
}

pub async fn record_issued<R>(repo: &mut R, record: &RefreshTokenRecord) -> Result<(), AppError>
where
    R: RefreshTokenRepository + ?Sized,
{
    repo.insert_refresh_token(record).await
}

/// Exchanges the record named by `presented_jti` for a successor.
///
/// # Errors
/// * `RefreshTokenNotFound` when no record carries that family id
/// * `RefreshTokenRevokedOrExpired` when the record was already rotated or is past expiry
/// * `InvalidRefreshToken` when the token's subject does not own the record
pub async fn rotate<R>(
    repo: &mut R,
    presented_jti: &str,
    presented_subject: Uuid,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Rotation, AppError>
where
    R: RefreshTokenRepository + ?Sized,
{
    let current = repo
        .find_refresh_token_for_update(presented_jti)
        .await?
        .ok_or(AuthError::RefreshTokenNotFound)?;

    if !current.is_usable(now) {
        tracing::warn!(
            account_id = %current.account_id,
            revoked = current.revoked,
            "Stale refresh token presented"
        );
        return Err(AuthError::RefreshTokenRevokedOrExpired.into());
    }

    if current.account_id != presented_subject {
        tracing::warn!(account_id = %current.account_id, "Refresh token subject mismatch");
        return Err(AuthError::InvalidRefreshToken.into());
    }

    let successor = RefreshTokenRecord::issue(current.account_id, now, ttl);

    // Only an unrevoked row can be flipped, so a concurrent rotation that got
    // here first leaves us with nothing to update
    if !repo
        .mark_refresh_token_replaced(&current.jti, &successor.jti)
        .await?
    {
        return Err(AuthError::RefreshTokenRevokedOrExpired.into());
    }
    repo.insert_refresh_token(&successor).await?;

    Ok(Rotation {
        account_id: current.account_id,
        previous_jti: current.jti,
        successor,
    })
}
