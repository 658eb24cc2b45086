/// Account and role records owned by the credential store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Role every new account receives
pub const DEFAULT_ROLE_CODE: &str = "CUSTOMER";
pub const DEFAULT_ROLE_NAME: &str = "Customer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Registered, email not yet verified
    Pending,
    Active,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(AccountStatus::Pending),
            "ACTIVE" => Some(AccountStatus::Active),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared role row, created lazily on first reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

impl Role {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone)]
pub struct Account {
    pub id: Uuid,
    /// Always stored normalized (trimmed, lowercase)
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub status: AccountStatus,
    pub roles: Vec<Role>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Keep the hash out of debug output
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("roles", &self.roles)
            .field("email_verified_at", &self.email_verified_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Account {
    /// A freshly registered account: pending verification, one role
    pub fn register(
        email: String,
        password_hash: String,
        name: String,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            name,
            status: AccountStatus::Pending,
            roles: vec![role],
            email_verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn role_codes(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.code.clone()).collect()
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = AccountStatus::Active;
        self.email_verified_at.get_or_insert(now);
        self.updated_at = now;
    }

    pub fn change_password_hash(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.updated_at = now;
    }

    pub fn rename(&mut self, name: String, now: DateTime<Utc>) {
        self.name = name;
        self.updated_at = now;
    }

    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            status: self.status,
            roles: self.role_codes(),
        }
    }
}

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub status: AccountStatus,
    pub roles: Vec<String>,
}
