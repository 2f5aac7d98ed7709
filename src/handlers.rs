use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::errors::AppError;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
}

/// Health check endpoint.
///
/// Always answers 200 with a fixed body and a wildcard CORS header.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(json!({
            "status": "UP",
            "checks": {
                "database": "OK"
            }
        })),
    )
}

/// Serves the bundled OpenAPI document, or 404 when the file is absent.
pub async fn serve_openapi_spec(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let content = tokio::fs::read(&state.config.openapi_path)
        .await
        .map_err(|e| {
            tracing::debug!("OpenAPI document unavailable at {}: {}", state.config.openapi_path, e);
            AppError::from(e)
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        content,
    ))
}

/// Builds the router with tracing and permissive CORS.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(serve_openapi_spec))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
