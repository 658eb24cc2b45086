/// Single-use verification and password reset codes
///
/// A code is scoped to one (email, purpose) pair. Issuing deletes whatever
/// was there before, so at most one live code exists per pair. Only the
/// SHA-256 digest of a code is stored; the plaintext travels in the mail.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::SingleUseTokenRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Verify,
    Reset,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Verify => "VERIFY",
            Purpose::Reset => "RESET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VERIFY" => Some(Purpose::Verify),
            "RESET" => Some(Purpose::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleUseToken {
    pub id: Uuid,
    /// Normalized email the code was sent to
    pub email: String,
    pub token_hash: String,
    pub purpose: Purpose,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SingleUseToken {
    pub fn new(email: &str, purpose: Purpose, code: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            token_hash: hash_code(code),
            purpose,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn matches(&self, supplied: &str) -> bool {
        self.token_hash == hash_code(supplied.trim())
    }
}

/// Outcome of presenting a code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// Matched and deleted
    Redeemed,
    Missing,
    /// Past expiry; deleted
    Expired,
    /// Wrong value; the live code stays
    Mismatch,
}

/// Random alphanumeric code of `length` characters
pub fn generate_code(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Replaces any live code for (email, purpose) with `code`
pub async fn issue<R>(
    repo: &mut R,
    email: &str,
    purpose: Purpose,
    code: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<SingleUseToken, AppError>
where
    R: SingleUseTokenRepository + ?Sized,
{
    let replaced = repo.delete_single_use_tokens(email, purpose).await?;
    if replaced > 0 {
        tracing::debug!(purpose = %purpose, replaced, "Replacing live single-use token");
    }

    let token = SingleUseToken::new(email, purpose, code, now, ttl);
    repo.insert_single_use_token(&token).await?;
    Ok(token)
}

/// Checks `supplied` against the live code. Expiry is checked before the
/// value, so an expired code fails even when it is correct.
pub async fn consume<R>(
    repo: &mut R,
    email: &str,
    purpose: Purpose,
    supplied: &str,
    now: DateTime<Utc>,
) -> Result<Redemption, AppError>
where
    R: SingleUseTokenRepository + ?Sized,
{
    let token = match repo.find_single_use_token(email, purpose).await? {
        Some(token) => token,
        None => return Ok(Redemption::Missing),
    };

    if token.is_expired(now) {
        repo.delete_single_use_tokens(email, purpose).await?;
        return Ok(Redemption::Expired);
    }

    if !token.matches(supplied) {
        return Ok(Redemption::Mismatch);
    }

    repo.delete_single_use_tokens(email, purpose).await?;
    Ok(Redemption::Redeemed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Store, StoreTransaction};

    const EMAIL: &str = "a@x.com";

    fn ttl() -> Duration {
        Duration::hours(1)
    }

    #[test]
    fn generated_codes_are_alphanumeric() {
        let code = generate_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_code(32), generate_code(32));
    }

    #[test]
    fn plaintext_code_is_not_stored() {
        let token = SingleUseToken::new(EMAIL, Purpose::Verify, "ABCD1234", Utc::now(), ttl());
        assert_ne!(token.token_hash, "ABCD1234");
        assert!(token.matches("ABCD1234"));
        assert!(!token.matches("abcd1234"));
    }

    #[tokio::test]
    async fn reissue_leaves_exactly_one_live_token() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        issue(&mut *tx, EMAIL, Purpose::Verify, "FIRST123", now, ttl()).await.unwrap();
        issue(&mut *tx, EMAIL, Purpose::Verify, "SECOND12", now, ttl()).await.unwrap();
        issue(&mut *tx, EMAIL, Purpose::Reset, "RESET123", now, ttl()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.live_single_use_tokens(EMAIL, Purpose::Verify).await, 1);
        assert_eq!(store.live_single_use_tokens(EMAIL, Purpose::Reset).await, 1);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            consume(&mut *tx, EMAIL, Purpose::Verify, "FIRST123", now).await.unwrap(),
            Redemption::Mismatch
        );
        assert_eq!(
            consume(&mut *tx, EMAIL, Purpose::Verify, "SECOND12", now).await.unwrap(),
            Redemption::Redeemed
        );
        assert_eq!(
            consume(&mut *tx, EMAIL, Purpose::Verify, "SECOND12", now).await.unwrap(),
            Redemption::Missing
        );
    }

    #[tokio::test]
    async fn expired_token_is_deleted_even_with_correct_code() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        issue(&mut *tx, EMAIL, Purpose::Reset, "RESET123", now, ttl()).await.unwrap();
        let outcome = consume(&mut *tx, EMAIL, Purpose::Reset, "RESET123", now + ttl())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, Redemption::Expired);
        assert_eq!(store.live_single_use_tokens(EMAIL, Purpose::Reset).await, 0);
    }

    #[tokio::test]
    async fn mismatch_keeps_the_live_token() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        issue(&mut *tx, EMAIL, Purpose::Verify, "GOODCODE", now, ttl()).await.unwrap();
        let outcome = consume(&mut *tx, EMAIL, Purpose::Verify, "BADCODE1", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, Redemption::Mismatch);
        assert_eq!(store.live_single_use_tokens(EMAIL, Purpose::Verify).await, 1);
    }
}
