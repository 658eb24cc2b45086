use serde::Deserialize;

use crate::error::ConfigError;

/// Smallest accepted HMAC secret, in bytes
const MIN_SECRET_LENGTH: usize = 32;
const MIN_CODE_LENGTH: usize = 6;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub account: AccountSettings,
    #[serde(default)]
    pub email: EmailSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "127.0.0.1".to_string(),
            database_name: "accounts".to_string(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level connection, for creating databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing and lifetime settings
#[derive(Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64, // seconds
    #[serde(default = "default_issuer")]
    pub issuer: String,
}

/// Account lifecycle settings: single-use codes and password hashing
#[derive(Deserialize, Clone, Debug)]
pub struct AccountSettings {
    #[serde(default = "default_single_use_token_expiry")]
    pub single_use_token_expiry: i64, // seconds
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            single_use_token_expiry: default_single_use_token_expiry(),
            code_length: default_code_length(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailTransport {
    #[default]
    Memory,
    Http,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct EmailSettings {
    #[serde(default)]
    pub transport: EmailTransport,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default = "default_email_timeout")]
    pub timeout_milliseconds: u64,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.jwt.access_token_expiry <= 0 || self.jwt.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiries must be positive".to_string(),
            ));
        }
        if self.account.single_use_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "account.single_use_token_expiry must be positive".to_string(),
            ));
        }
        if self.account.code_length < MIN_CODE_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "account.code_length must be at least {}",
                MIN_CODE_LENGTH
            )));
        }
        if self.email.transport == EmailTransport::Http {
            if self.email.base_url.is_empty() {
                return Err(ConfigError::MissingRequired("email.base_url".to_string()));
            }
            if self.email.sender.is_empty() {
                return Err(ConfigError::MissingRequired("email.sender".to_string()));
            }
        }
        Ok(())
    }
}

/// Reads `configuration.yaml` (optional) and `APP_*` environment overrides,
/// e.g. `APP_JWT__SECRET` or `APP_APPLICATION__PORT`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_expiry() -> i64 {
    3600
}

fn default_refresh_token_expiry() -> i64 {
    604_800
}

fn default_issuer() -> String {
    "account-service".to_string()
}

fn default_single_use_token_expiry() -> i64 {
    3600
}

fn default_code_length() -> usize {
    8
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_email_timeout() -> u64 {
    10_000
}
