use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_lead_core::config::Config;
use rust_lead_core::handlers::{self, AppState};

/// Main entry point for the service.
///
/// Initializes tracing and configuration, then serves the health and
/// OpenAPI endpoints.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let app = handlers::router(Arc::new(AppState {
        config: config.clone(),
    }));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health Check available at http://localhost:{}/health", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
