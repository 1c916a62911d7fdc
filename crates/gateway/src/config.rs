use inference::DetectorConfig;
use std::env;
use std::time::Duration;

pub use common::Environment;

/// Front-end origins allowed to call the API from a browser during development.
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://localhost:8000",
    "http://localhost:5173",
    "http://127.0.0.1",
    "http://127.0.0.1:8000",
    "http://127.0.0.1:5173",
];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub bind_addr: String,
    pub detector: DetectorConfig,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
    pub otel_endpoint: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            bind_addr: "0.0.0.0:8000".to_string(),
            detector: DetectorConfig::default(),
            inference_timeout: Duration::from_millis(30_000),
            max_upload_bytes: 20 * 1024 * 1024,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            otel_endpoint: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let environment = Environment::from_env();

        let bind_addr = env::var("BIND_ADDR").unwrap_or(defaults.bind_addr);

        let detector = DetectorConfig::from_env()?;

        let inference_timeout = env::var("INFERENCE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.inference_timeout);

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_upload_bytes);

        let cors_origins = match env::var("CORS_ORIGINS") {
            Ok(raw) => parse_origins(&raw)?,
            Err(_) => defaults.cors_origins,
        };

        let otel_endpoint = env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            bind_addr,
            detector,
            inference_timeout,
            max_upload_bytes,
            cors_origins,
            otel_endpoint,
        })
    }
}

/// Comma-separated origin list. Credentials are allowed, so `*` is rejected.
fn parse_origins(raw: &str) -> anyhow::Result<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect();

    anyhow::ensure!(
        !origins.iter().any(|o| o == "*"),
        "CORS_ORIGINS cannot contain `*` because credentials are allowed"
    );

    Ok(origins)
}
