/// Profile of the authenticated caller. Mounted behind `JwtMiddleware`,
/// which provides the `AuthenticatedUser`.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::{AuthService, AuthenticatedUser};
use crate::context::RequestContext;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

/// GET /users/me
pub async fn get_current_user(
    user: web::ReqData<AuthenticatedUser>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    let profile = service
        .profile(&context.for_operation("get_profile"), user.account_id)
        .await?;

    Ok(HttpResponse::Ok().json(profile))
}

/// PUT /users/me
pub async fn update_current_user(
    user: web::ReqData<AuthenticatedUser>,
    form: web::Json<UpdateProfileRequest>,
    service: web::Data<AuthService>,
    context: RequestContext,
) -> Result<HttpResponse, AppError> {
    let profile = service
        .update_profile(&context.for_operation("update_profile"), user.account_id, &form.name)
        .await?;

    Ok(HttpResponse::Ok().json(profile))
}
