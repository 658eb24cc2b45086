/// Error Handling Module
///
/// One error type for the whole service. Domain-specific enums describe what
/// went wrong; `AppError` unifies them for control flow, and the HTTP mapping
/// at the bottom of this file turns them into JSON problem responses.
///
/// Credential and token failures do not say which check failed.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

use crate::auth::Purpose;

// ============================================================================
// 1. DOMAIN-SPECIFIC ERROR TYPES
// ============================================================================

/// Validation errors for input data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
    SuspiciousContent(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::SuspiciousContent(field) => {
                write!(f, "{} contains suspicious content", field)
            }
        }
    }
}

impl StdError for ValidationError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    QueryExecution(String),
    ConnectionPool(String),
    Serialization(String),
    UnexpectedError(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::Serialization(msg) => {
                write!(f, "Concurrent update conflict: {}", msg)
            }
            DatabaseError::UnexpectedError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Email service errors
#[derive(Debug, Clone)]
pub enum EmailError {
    SendFailed(String),
    InvalidRecipient(String),
    ConfigurationError(String),
}

impl fmt::Display for EmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailError::SendFailed(msg) => write!(f, "Failed to send email: {}", msg),
            EmailError::InvalidRecipient(msg) => write!(f, "Invalid recipient: {}", msg),
            EmailError::ConfigurationError(msg) => write!(f, "Email config error: {}", msg),
        }
    }
}

impl StdError for EmailError {}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Authentication errors. All of them surface as "unauthenticated".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email or wrong password; the two are indistinguishable.
    InvalidCredentials,
    AccountNotActive,
    InvalidRefreshToken,
    RefreshTokenNotFound,
    RefreshTokenRevokedOrExpired,
    InvalidCode(Purpose),
    CodeExpired(Purpose),
    MissingToken,
    InvalidAccessToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::AccountNotActive => write!(
                f,
                "Account not active. Please verify your email before logging in."
            ),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            AuthError::RefreshTokenNotFound => {
                write!(f, "Refresh token not found or already used")
            }
            AuthError::RefreshTokenRevokedOrExpired => {
                write!(f, "Refresh token expired or revoked")
            }
            AuthError::InvalidCode(Purpose::Verify) => write!(f, "Invalid verification code"),
            AuthError::InvalidCode(Purpose::Reset) => write!(f, "Invalid password reset token"),
            AuthError::CodeExpired(Purpose::Verify) => write!(f, "Verification code expired"),
            AuthError::CodeExpired(Purpose::Reset) => write!(f, "Password reset token expired"),
            AuthError::MissingToken => write!(f, "Missing authentication token"),
            AuthError::InvalidAccessToken => write!(f, "Invalid or expired token"),
        }
    }
}

impl StdError for AuthError {}

/// Resources that can be in conflict with an existing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    EmailTaken,
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::EmailTaken => write!(f, "Email already registered"),
        }
    }
}

impl StdError for ConflictError {}

// ============================================================================
// 2. UNIFIED APPLICATION ERROR TYPE
// ============================================================================

/// Coarse error classes callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Unauthenticated,
    NotFound,
    Internal,
}

/// Central error type that all application errors map to
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Conflict(ConflictError),
    Auth(AuthError),
    NotFound(String),
    Database(DatabaseError),
    Email(EmailError),
    Config(ConfigError),
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Auth(_) => ErrorKind::Unauthenticated,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Database(_)
            | AppError::Email(_)
            | AppError::Config(_)
            | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(ConflictError::EmailTaken) => "EMAIL_TAKEN",
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                AuthError::AccountNotActive => "ACCOUNT_NOT_ACTIVE",
                AuthError::InvalidRefreshToken => "INVALID_REFRESH",
                AuthError::RefreshTokenNotFound => "REFRESH_NOT_FOUND",
                AuthError::RefreshTokenRevokedOrExpired => "REVOKED_OR_EXPIRED",
                AuthError::InvalidCode(_) => "INVALID_CODE",
                AuthError::CodeExpired(_) => "CODE_EXPIRED",
                AuthError::MissingToken => "MISSING_TOKEN",
                AuthError::InvalidAccessToken => "TOKEN_INVALID",
            },
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(DatabaseError::ConnectionPool(_)) => "SERVICE_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Email(_) => "EMAIL_SERVICE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the authentication failure, if this is one
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            AppError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Conflict(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::NotFound(what) => write!(f, "Not found: {}", what),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Email(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<ConflictError> for AppError {
    fn from(err: ConflictError) -> Self {
        AppError::Conflict(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::Email(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

/// Postgres SQLSTATE for a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE raised when a serializable transaction loses a race
const SERIALIZATION_FAILURE: &str = "40001";
const ACCOUNTS_EMAIL_KEY: &str = "accounts_email_key";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let db_error = err.as_database_error();
        let code = db_error.and_then(|db| db.code().map(|c| c.to_string()));
        let constraint = db_error.and_then(|db| db.constraint().map(str::to_string));

        match (code.as_deref(), &err) {
            (Some(UNIQUE_VIOLATION), _) if constraint.as_deref() == Some(ACCOUNTS_EMAIL_KEY) => {
                AppError::Conflict(ConflictError::EmailTaken)
            }
            (Some(SERIALIZATION_FAILURE), _) => {
                AppError::Database(DatabaseError::Serialization(err.to_string()))
            }
            (_, sqlx::Error::PoolTimedOut)
            | (_, sqlx::Error::PoolClosed)
            | (_, sqlx::Error::Io(_)) => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            (_, sqlx::Error::Database(_)) => {
                AppError::Database(DatabaseError::QueryExecution(err.to_string()))
            }
            _ => AppError::Database(DatabaseError::UnexpectedError(err.to_string())),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl AppError {
    /// Message safe to show to a client. Infrastructure failures are hidden.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(_)
            | AppError::Conflict(_)
            | AppError::Auth(_)
            | AppError::NotFound(_) => self.to_string(),
            AppError::Database(DatabaseError::ConnectionPool(_)) => {
                "Database service temporarily unavailable".to_string()
            }
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Email(_) => "Email service temporarily unavailable".to_string(),
            AppError::Config(_) => "Server configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    fn log(&self, error_id: &str) {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => {
                tracing::info!(error_id = error_id, code = self.code(), error = %self, "Request rejected");
            }
            ErrorKind::Unauthenticated => {
                tracing::warn!(error_id = error_id, code = self.code(), "Authentication failed");
            }
            ErrorKind::NotFound => {
                tracing::warn!(error_id = error_id, error = %self, "Referenced record missing");
            }
            ErrorKind::Internal => {
                tracing::error!(error_id = error_id, error = %self, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(DatabaseError::ConnectionPool(_)) | AppError::Email(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log(&error_id);

        let status = self.status_code();
        let body = ErrorResponse::new(
            error_id,
            self.public_message(),
            self.code().to_string(),
            status.as_u16(),
        );

        HttpResponse::build(status).json(body)
    }
}
