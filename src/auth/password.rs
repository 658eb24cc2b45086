/// Password Hashing and Verification
///
/// Plaintext passwords never leave this module: callers hand over the
/// plaintext and get back an opaque bcrypt hash, or a yes/no match.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::AppError;

/// One-way hash-and-compare capability
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, AppError>;

    /// False for a wrong password. Errors only when the stored hash is unreadable.
    fn matches(&self, plaintext: &str, hash: &str) -> Result<bool, AppError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, plaintext: &str) -> Result<String, AppError> {
        hash(plaintext, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn matches(&self, plaintext: &str, hash: &str) -> Result<bool, AppError> {
        verify(plaintext, hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}
