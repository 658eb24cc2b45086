use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::configuration::{Settings, StorageBackend};
use crate::email_client::build_mailer;
use crate::error::{AppError, ValidationError};
use crate::events::BroadcastPublisher;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    get_current_user, health_check, login, perform_password_reset, refresh, register,
    request_password_reset, send_verification, update_current_user, verify,
};
use crate::store::{InMemoryStore, PgStore, Store};

/// Wires the service from configuration: storage backend, mail transport
/// and the event publisher (returned so the caller can subscribe).
pub async fn build_auth_service(
    settings: &Settings,
) -> Result<(AuthService, BroadcastPublisher), AppError> {
    let store: Arc<dyn Store> = match settings.database.backend {
        StorageBackend::Postgres => Arc::new(PgStore::connect(&settings.database).await?),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };
    let mailer = build_mailer(&settings.email)?;
    let publisher = BroadcastPublisher::default();

    let service = AuthService::new(settings, store, mailer, Arc::new(publisher.clone()));
    Ok((service, publisher))
}

pub fn run(listener: TcpListener, service: AuthService) -> Result<Server, std::io::Error> {
    let service = web::Data::new(service);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(service.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                tracing::debug!(error = %err, "Rejected JSON body");
                AppError::Validation(ValidationError::InvalidFormat("request body".to_string()))
                    .into()
            }))
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/verify/send", web::post().to(send_verification))
                    .route("/verify", web::post().to(verify))
                    .route("/password/reset", web::post().to(request_password_reset))
                    .route(
                        "/password/reset/perform",
                        web::post().to(perform_password_reset),
                    ),
            )
            // Bearer-protected routes
            .service(
                web::scope("/users")
                    .wrap(JwtMiddleware)
                    .route("/me", web::get().to(get_current_user))
                    .route("/me", web::put().to(update_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
