/// Authentication module
///
/// Token codec, password hashing, the refresh token ledger, single-use
/// codes, and the service that composes them.

mod claims;
mod jwt;
mod password;
pub mod refresh_token;
mod service;
pub mod single_use;

pub use claims::{ExtraClaims, TokenClaims};
pub use jwt::{InvalidToken, TokenCodec};
pub use password::{BcryptHasher, PasswordHasher};
pub use refresh_token::RefreshTokenRecord;
pub use service::{AuthService, AuthenticatedUser, RegisterInput, TokenPair};
pub use single_use::{Purpose, Redemption, SingleUseToken};
