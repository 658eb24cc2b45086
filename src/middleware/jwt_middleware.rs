/// JWT Authentication Middleware
///
/// Validates the bearer access token from the Authorization header and
/// injects the resulting `AuthenticatedUser` into request extensions.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::AuthService;
use crate::context::RequestContext;
use crate::error::{AppError, AuthError};

/// Protects a scope. Needs `web::Data<AuthService>` registered on the app.
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authenticated = match (bearer_token(&req), req.app_data::<web::Data<AuthService>>()) {
            (None, _) => Err(AppError::from(AuthError::MissingToken)),
            (Some(_), None) => Err(AppError::Internal(
                "AuthService not registered".to_string(),
            )),
            (Some(token), Some(service)) => service.authenticate(&token),
        };

        match authenticated {
            Ok(user) => {
                let mut extensions = req.extensions_mut();
                if let Some(context) = extensions.get_mut::<RequestContext>() {
                    context.user_id = Some(user.account_id.to_string());
                }
                tracing::debug!(account_id = %user.account_id, "JWT validated successfully");
                extensions.insert(user);
                drop(extensions);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), code = e.code(), "JWT validation failed");
                Box::pin(async move { Err(e.into()) })
            }
        }
    }
}
