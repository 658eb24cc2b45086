/// JWT Token Generation and Validation
///
/// `TokenCodec` signs and checks every bearer credential the service hands
/// out. It holds no state besides the signing key and a clock, so clones are
/// cheap and can be shared across workers.

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::{ExtraClaims, TokenClaims};
use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// A token failed validation. Parse, signature, issuer and expiry failures
/// are not told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidToken;

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid token")
    }
}

impl std::error::Error for InvalidToken {}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // Expiry is checked against the injected clock in `validate`
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: Duration::seconds(config.access_token_expiry),
            refresh_ttl: Duration::seconds(config.refresh_token_expiry),
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Signs a token for `subject` valid for `ttl` from now.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if encoding fails.
    pub fn issue(&self, subject: &str, extra: ExtraClaims, ttl: Duration) -> Result<String, AppError> {
        let now = self.clock.now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
            roles: extra.roles,
            jti: extra.jti,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    pub fn issue_access_token(&self, account_id: Uuid, roles: Vec<String>) -> Result<String, AppError> {
        self.issue(&account_id.to_string(), ExtraClaims::roles(roles), self.access_ttl)
    }

    pub fn issue_refresh_token(&self, account_id: Uuid, jti: &str) -> Result<String, AppError> {
        self.issue(&account_id.to_string(), ExtraClaims::family(jti), self.refresh_ttl)
    }

    /// Verifies signature and issuer, then requires `now < exp`.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, InvalidToken> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation error");
                InvalidToken
            })?;

        if self.clock.now().timestamp() >= claims.exp {
            tracing::debug!("JWT expired");
            return Err(InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn codec_with_clock() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (TokenCodec::new(&get_test_config(), clock.clone()), clock)
    }

    #[test]
    fn test_generate_and_validate_token() {
        let (codec, _) = codec_with_clock();
        let account_id = Uuid::new_v4();

        let token = codec
            .issue_access_token(account_id, vec!["CUSTOMER".to_string()])
            .expect("Failed to generate token");
        let claims = codec.validate(&token).expect("Failed to validate token");

        assert_eq!(claims.account_id(), Some(account_id));
        assert_eq!(claims.roles(), ["CUSTOMER".to_string()]);
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.jti.is_none());
    }

    #[test]
    fn refresh_token_carries_family_id() {
        let (codec, _) = codec_with_clock();
        let token = codec.issue_refresh_token(Uuid::new_v4(), "family-1").unwrap();
        let claims = codec.validate(&token).unwrap();

        assert_eq!(claims.jti.as_deref(), Some("family-1"));
        assert_eq!(claims.exp - claims.iat, 604800);
    }

    #[test]
    fn test_invalid_token() {
        let (codec, _) = codec_with_clock();
        assert_eq!(codec.validate("invalid.token.here"), Err(InvalidToken));
    }

    #[test]
    fn test_tampered_token() {
        let (codec, _) = codec_with_clock();
        let token = codec.issue_access_token(Uuid::new_v4(), vec![]).unwrap();

        let tampered = format!("{}X", token);
        assert_eq!(codec.validate(&tampered), Err(InvalidToken));
    }

    #[test]
    fn test_wrong_issuer() {
        let (codec, clock) = codec_with_clock();
        let token = codec.issue_access_token(Uuid::new_v4(), vec![]).unwrap();

        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        let other = TokenCodec::new(&config, clock);

        assert_eq!(other.validate(&token), Err(InvalidToken));
    }

    #[test]
    fn expiry_is_exclusive() {
        let (codec, clock) = codec_with_clock();
        let token = codec
            .issue(&Uuid::new_v4().to_string(), ExtraClaims::default(), Duration::seconds(60))
            .unwrap();

        clock.advance(Duration::seconds(59));
        assert!(codec.validate(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(codec.validate(&token), Err(InvalidToken));
    }
}
