use account_service::configuration::get_configuration;
use account_service::events::log_account_events;
use account_service::startup::{build_auth_service, run};
use account_service::telemetry::init_telemetry;
use std::net::TcpListener;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let (service, publisher) = build_auth_service(&configuration).await.map_err(|e| {
        tracing::error!("Failed to initialise service: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Service initialisation error")
    })?;

    tokio::spawn(log_account_events(publisher.subscribe()));

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, service)?.await
}
