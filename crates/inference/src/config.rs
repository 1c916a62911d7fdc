use crate::backend::ExecutionProvider;
use std::env;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

/// Largest accepted model input side, in pixels.
pub const MAX_INPUT_SIDE: u32 = 8192;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: String,
    /// Newline-separated class names. When unset the table embedded in the model is used.
    pub labels_path: Option<String>,
    pub input_size: (u32, u32),
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/best.onnx".to_string(),
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 4,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let model_path = env::var("MODEL_PATH").unwrap_or(defaults.model_path);

        let labels_path = env::var("LABELS_PATH").ok().filter(|s| !s.is_empty());

        let input_width = env::var("INPUT_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.input_size.0);

        let input_height = env::var("INPUT_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.input_size.1);

        let confidence_threshold = env::var("CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.confidence_threshold);

        let iou_threshold = env::var("IOU_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.iou_threshold);

        let max_detections = env::var("MAX_DETECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_detections);

        let execution_provider = match env::var("EXECUTION_PROVIDER") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.execution_provider,
        };

        let intra_threads = env::var("INTRA_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.intra_threads);

        let config = Self {
            model_path,
            labels_path,
            input_size: (input_width, input_height),
            confidence_threshold,
            iou_threshold,
            max_detections,
            execution_provider,
            intra_threads,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.confidence_threshold),
            "CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
            self.confidence_threshold
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.iou_threshold),
            "IOU_THRESHOLD must be within [0, 1], got {}",
            self.iou_threshold
        );
        anyhow::ensure!(
            self.input_size.0 > 0 && self.input_size.1 > 0,
            "Input size must be non-zero, got {}x{}",
            self.input_size.0,
            self.input_size.1
        );
        anyhow::ensure!(
            self.input_size.0 <= MAX_INPUT_SIDE && self.input_size.1 <= MAX_INPUT_SIDE,
            "Input size must be at most {}x{}, got {}x{}",
            MAX_INPUT_SIDE,
            MAX_INPUT_SIDE,
            self.input_size.0,
            self.input_size.1
        );
        anyhow::ensure!(self.max_detections > 0, "MAX_DETECTIONS must be positive");
        Ok(())
    }
}
