mod auth;
mod health_check;
mod users;

pub use auth::{
    login, perform_password_reset, refresh, register, request_password_reset, send_verification,
    verify,
};
pub use health_check::health_check;
pub use users::{get_current_user, update_current_user};
