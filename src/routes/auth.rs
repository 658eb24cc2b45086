/// Authentication Routes
///
/// Thin JSON adapters over `AuthService`. Validation and every failure
/// mapping live in the service and in `AppError`.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, RegisterInput};
use crate::context::RequestContext;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct PerformResetRequest {
    pub email: String,
    pub token: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

fn message(message: &'static str) -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse { message })
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid email, name or password length
/// - 409: email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    let profile = service
        .register(
            &context.for_operation("user_registration"),
            RegisterInput {
                email: form.email,
                password: form.password,
                name: form.name,
            },
        )
        .await?;

    Ok(HttpResponse::Created().json(profile))
}

/// POST /auth/login
///
/// # Errors
/// - 401: invalid credentials (unknown email and wrong password look the same), or account not active
pub async fn login(
    form: web::Json<LoginRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    let tokens = service
        .login(&context.for_operation("user_login"), &form.email, &form.password)
        .await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/refresh
///
/// Rotates the refresh token: the presented token stops working.
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    let tokens = service
        .refresh_access_token(&context.for_operation("token_refresh"), &form.refresh_token)
        .await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/verify/send
pub async fn send_verification(
    form: web::Json<EmailRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    service
        .send_verification_email(&context.for_operation("send_verification"), &form.email)
        .await?;

    Ok(message("Verification email sent"))
}

/// POST /auth/verify
pub async fn verify(
    form: web::Json<VerifyRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    service
        .verify_email(&context.for_operation("verify_email"), &form.email, &form.code)
        .await?;

    Ok(message("Email verified"))
}

/// POST /auth/password/reset
pub async fn request_password_reset(
    form: web::Json<EmailRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    service
        .request_password_reset(&context.for_operation("request_password_reset"), &form.email)
        .await?;

    Ok(message("Password reset email sent"))
}

/// POST /auth/password/reset/perform
pub async fn perform_password_reset(
    form: web::Json<PerformResetRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    service
        .perform_password_reset(
            &context.for_operation("perform_password_reset"),
            &form.email,
            &form.token,
            &form.new_password,
        )
        .await?;

    Ok(message("Password updated"))
}
