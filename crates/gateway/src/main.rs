use common::TelemetryGuard;
use gateway::{
    AppState, DetectionService, GatewayConfig,
    logging::{SERVICE_NAME, setup_logging},
    server::run_server,
};
use inference::{Detector, YoloDetector, backend::ort::OrtBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init(SERVICE_NAME, endpoint, config.environment))
        .transpose()?;

    setup_logging(&config);

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    tracing::info!(model_path = %config.detector.model_path, "Loading detector model");
    let detector = YoloDetector::<OrtBackend>::load(&config.detector).inspect_err(|e| {
        tracing::error!(error = %e, "Detector model could not be loaded");
    })?;
    tracing::info!(
        classes = detector.labels().len(),
        "Model loaded successfully"
    );

    let service = DetectionService::new(Box::new(detector), config.inference_timeout);
    run_server(AppState::new(service), &config).await
}
