use crate::{
    config::GatewayConfig,
    error::ApiError,
    service::{DetectionResult, HealthStatus},
    state::AppState,
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

pub fn create_app(state: AppState, config: &GatewayConfig) -> anyhow::Result<Router> {
    let cors = cors_layer(&config.cors_origins)?;

    Ok(Router::new()
        .route("/", get(health_handler))
        .route("/predict/", post(predict_handler))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin {:?}", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus::running())
}

async fn predict_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResult>, ApiError> {
    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await?;

        tracing::debug!(
            file_name = ?file_name,
            content_type = ?content_type,
            size = bytes.len(),
            "Received upload"
        );

        let result = state.service.detect(bytes).await?;
        return Ok(Json(result));
    }

    Err(ApiError::MissingFile(UPLOAD_FIELD))
}

pub async fn run_server(state: AppState, config: &GatewayConfig) -> anyhow::Result<()> {
    let app = create_app(state, config)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "Detection API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
