use crate::error::ApiError;
use axum::body::Bytes;
use common::span;
use image::{DynamicImage, ImageDecoder, ImageReader};
use inference::{Detector, LabelTable, Prediction};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{sync::Mutex, task::JoinError};

pub const HEALTH_MESSAGE: &str = "YOLO Object Detection API is running!";

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub message: &'static str,
}

impl HealthStatus {
    pub fn running() -> Self {
        Self {
            message: HEALTH_MESSAGE,
        }
    }
}

/// One detected object. Box corners are in original image pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    pub class_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

/// Decode an uploaded file into an image buffer. The format is sniffed from the bytes
/// and any EXIF orientation is applied, so boxes refer to the upright image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ApiError> {
    let _s = span!("decode_image");

    if bytes.is_empty() {
        return Err(ApiError::InvalidImage("uploaded file is empty".to_string()));
    }

    let invalid = |e: image::ImageError| ApiError::InvalidImage(e.to_string());

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ApiError::InvalidImage(e.to_string()))?
        .into_decoder()
        .map_err(invalid)?;
    let orientation = decoder.orientation().map_err(invalid)?;

    let mut image = DynamicImage::from_decoder(decoder).map_err(invalid)?;
    image.apply_orientation(orientation);

    Ok(image)
}

/// Attach label names to predictions, keeping the detector's ordering.
pub fn format_detections(
    predictions: &[Prediction],
    labels: &LabelTable,
) -> Result<DetectionResult, ApiError> {
    let detections = predictions
        .iter()
        .map(|p| {
            let name = labels.name(p.class_id).ok_or_else(|| {
                ApiError::InferenceFailure(format!(
                    "class id {} is outside the label table ({} classes)",
                    p.class_id,
                    labels.len()
                ))
            })?;

            Ok(Detection {
                xmin: p.x1,
                ymin: p.y1,
                xmax: p.x2,
                ymax: p.y2,
                confidence: p.confidence,
                class_id: p.class_id,
                name: name.to_string(),
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(DetectionResult { detections })
}

/// The detector plus a flag left set when a run unwinds, so later requests
/// never reuse a half-updated session.
struct DetectorSlot {
    detector: Box<dyn Detector>,
    poisoned: bool,
}

struct DetectMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    errors: Counter<u64>,
    detections: Counter<u64>,
}

impl DetectMetrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0, 10.0, 30.0,
        ];

        Self {
            duration: meter
                .f64_histogram("detect_duration_seconds")
                .with_description("Time to answer a detection request (decode + infer + format)")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("detect_requests_total")
                .with_description("Total detection requests received")
                .build(),
            errors: meter
                .u64_counter("detect_errors_total")
                .with_description("Detection requests that failed, by error kind")
                .build(),
            detections: meter
                .u64_counter("detections_total")
                .with_description("Total detections returned")
                .build(),
        }
    }
}

/// Runs uploads through the shared detector.
///
/// The detector is invoked on the blocking pool and serialised by an async mutex, since an
/// inference session needs exclusive access for each run. Waiting for the lock counts
/// against the inference timeout, and a request that times out never reaches the model.
pub struct DetectionService {
    detector: Arc<Mutex<DetectorSlot>>,
    inference_timeout: Duration,
    metrics: DetectMetrics,
}

impl DetectionService {
    pub fn new(detector: Box<dyn Detector>, inference_timeout: Duration) -> Self {
        Self {
            detector: Arc::new(Mutex::new(DetectorSlot {
                detector,
                poisoned: false,
            })),
            inference_timeout,
            metrics: DetectMetrics::new("gateway"),
        }
    }

    pub async fn detect(&self, bytes: Bytes) -> Result<DetectionResult, ApiError> {
        let start = Instant::now();
        self.metrics.requests.add(1, &[]);

        let result = self.run(bytes).await;

        match &result {
            Ok(r) => {
                self.metrics.detections.add(r.detections.len() as u64, &[]);
                tracing::info!(
                    detections = r.detections.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Detection complete"
                );
            }
            Err(e) => self.metrics.errors.add(1, &[KeyValue::new("kind", e.kind())]),
        }
        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &[]);

        result
    }

    async fn run(&self, bytes: Bytes) -> Result<DetectionResult, ApiError> {
        let span = tracing::Span::current();

        let decode_span = span.clone();
        let image = tokio::task::spawn_blocking(move || {
            let _e = decode_span.enter();
            decode_image(&bytes)
        })
        .await
        .map_err(task_failed)??;

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            "Image decoded"
        );

        let timeout = self.inference_timeout;
        let deadline = Instant::now() + timeout;
        let detector = Arc::clone(&self.detector);

        let task = async move {
            let mut slot = detector.lock_owned().await;

            tokio::task::spawn_blocking(move || -> Result<DetectionResult, ApiError> {
                let _e = span.enter();

                // the blocking pool may start this after the caller gave up
                if Instant::now() >= deadline {
                    return Err(ApiError::InferenceTimeout(timeout));
                }
                if slot.poisoned {
                    return Err(ApiError::InferenceFailure(
                        "detector poisoned by an earlier panic".to_string(),
                    ));
                }

                slot.poisoned = true;
                let predictions = slot.detector.detect(&image);
                slot.poisoned = false;

                format_detections(&predictions?, slot.detector.labels())
            })
            .await
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(task_failed)?,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.inference_timeout.as_millis() as u64,
                    "Inference timed out"
                );
                Err(ApiError::InferenceTimeout(self.inference_timeout))
            }
        }
    }
}

fn task_failed(e: JoinError) -> ApiError {
    ApiError::InferenceFailure(format!("worker task failed: {}", e))
}
