/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. Access tokens carry the
/// account's role codes, refresh tokens carry the family identifier (`jti`)
/// that names their ledger record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject (account ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Refresh token family identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl TokenClaims {
    /// Account ID carried in `sub`, if it is a UUID
    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or(&[])
    }
}

/// Optional claims placed next to the registered ones
#[derive(Debug, Default, Clone)]
pub struct ExtraClaims {
    pub roles: Option<Vec<String>>,
    pub jti: Option<String>,
}

impl ExtraClaims {
    pub fn roles(roles: Vec<String>) -> Self {
        Self {
            roles: Some(roles),
            jti: None,
        }
    }

    pub fn family(jti: impl Into<String>) -> Self {
        Self {
            roles: None,
            jti: Some(jti.into()),
        }
    }
}
