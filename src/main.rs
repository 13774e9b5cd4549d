//! klippy-gateway server entry point.
//!
//! Starts the backend supervisor and the Axum HTTP server with REST and
//! WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use klippy_gateway::api;
use klippy_gateway::app_state::AppState;
use klippy_gateway::config::GatewayConfig;
use klippy_gateway::service::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
    tracing::info!(
        addr = %config.listen_addr,
        klippy = %config.klippy_address.display(),
        "starting klippy-gateway"
    );

    // Build the gateway and keep Klippy connected in the background
    let gateway = Gateway::new(config.clone());
    let supervisor = tokio::spawn(Arc::clone(&gateway).run());

    // Build router
    let app = api::build_app(AppState::new(Arc::clone(&gateway)));
    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        app.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("unable to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "unable to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("shutting down");
    supervisor.abort();
    gateway.shutdown().await;
    Ok(())
}
