//! HTTP-level tests for the detection API, driven through the router with mock detectors.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use gateway::{AppState, DetectionService, GatewayConfig, server::create_app};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inference::{
    Detector, DetectorConfig, DetectorError, InferenceBackend, InferenceOutput, LabelTable,
    Prediction, YoloDetector,
};
use ndarray::{Array, ArrayD, IxDyn};
use serde_json::Value;
use std::io::Cursor;
use std::time::Duration;
use tower::util::ServiceExt;

const BOUNDARY: &str = "detection-test-boundary";

struct StubDetector {
    predictions: Vec<Prediction>,
    labels: LabelTable,
    delay: Duration,
}

impl StubDetector {
    fn new(predictions: Vec<Prediction>) -> Self {
        Self {
            predictions,
            labels: LabelTable::new(vec![
                "person".to_string(),
                "bicycle".to_string(),
                "car".to_string(),
            ]),
            delay: Duration::ZERO,
        }
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Prediction>, DetectorError> {
        std::thread::sleep(self.delay);
        Ok(self.predictions.clone())
    }

    fn labels(&self) -> &LabelTable {
        &self.labels
    }
}

struct FailingDetector(LabelTable);

impl Detector for FailingDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Prediction>, DetectorError> {
        Err(DetectorError::Inference(anyhow::anyhow!(
            "Unexpected output shape [1, 3]"
        )))
    }

    fn labels(&self) -> &LabelTable {
        &self.0
    }
}

/// Backend producing a raw YOLO output tensor, so the full pre/post pipeline runs.
struct CannedBackend {
    output: ArrayD<f32>,
}

impl InferenceBackend for CannedBackend {
    fn load_model(_config: &DetectorConfig) -> anyhow::Result<Self> {
        anyhow::bail!("CannedBackend is built directly")
    }

    fn infer(&mut self, _images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        Ok(InferenceOutput {
            predictions: self.output.clone(),
        })
    }
}

fn prediction(x1: f32, y1: f32, class_id: u32, confidence: f32) -> Prediction {
    Prediction {
        x1,
        y1,
        x2: x1 + 30.0,
        y2: y1 + 60.0,
        confidence,
        class_id,
    }
}

fn app_with(detector: Box<dyn Detector>, config: GatewayConfig) -> Router {
    let service = DetectionService::new(detector, config.inference_timeout);
    create_app(AppState::new(service), &config).unwrap()
}

fn app(detector: impl Detector + 'static) -> Router {
    app_with(Box::new(detector), GatewayConfig::default())
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn multipart_body(field: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.png\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn predict_request(field: &str, contents: &[u8]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/predict/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, contents)))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn approx(value: &Value, expected: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() < 0.1)
}

#[tokio::test]
async fn test_health_check() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(app(StubDetector::new(vec![])), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({"message": "YOLO Object Detection API is running!"})
    );
}

#[tokio::test]
async fn test_health_check_ignores_detector_state() {
    let detector = FailingDetector(LabelTable::new(vec!["a".to_string()]));
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, _) = send(app(detector), request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_predict_returns_named_detections() {
    let detector = StubDetector::new(vec![prediction(10.0, 20.0, 2, 0.91)]);
    let (status, body) = send(app(detector), predict_request("file", &png_bytes(64, 48))).await;

    assert_eq!(status, StatusCode::OK);
    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);

    let d = &detections[0];
    assert_eq!(d["class_id"], 2);
    assert_eq!(d["name"], "car");
    assert!(approx(&d["xmin"], 10.0));
    assert!(approx(&d["ymin"], 20.0));
    assert!(approx(&d["xmax"], 40.0));
    assert!(approx(&d["ymax"], 80.0));
    assert!(approx(&d["confidence"], 0.91));
}

#[tokio::test]
async fn test_predict_without_trailing_slash() {
    let detector = StubDetector::new(vec![]);
    let mut request = predict_request("file", &png_bytes(8, 8));
    *request.uri_mut() = "/predict".parse().unwrap();

    let (status, body) = send(app(detector), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detections"], serde_json::json!([]));
}

#[tokio::test]
async fn test_predict_preserves_detector_order() {
    let detector = StubDetector::new(vec![
        prediction(100.0, 0.0, 1, 0.30),
        prediction(0.0, 0.0, 0, 0.95),
        prediction(50.0, 50.0, 2, 0.60),
    ]);
    let (status, body) = send(app(detector), predict_request("file", &png_bytes(32, 32))).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["detections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bicycle", "person", "car"]);
}

#[tokio::test]
async fn test_predict_zero_boxes_is_empty_list() {
    let (status, body) = send(
        app(StubDetector::new(vec![])),
        predict_request("file", &png_bytes(16, 16)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"detections": []}));
}

#[tokio::test]
async fn test_predict_empty_upload_is_bad_request() {
    let (status, body) = send(
        app(StubDetector::new(vec![])),
        predict_request("file", &[]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Invalid image"));
}

#[tokio::test]
async fn test_predict_undecodable_bytes_is_bad_request() {
    let (status, body) = send(
        app(StubDetector::new(vec![prediction(0.0, 0.0, 0, 0.9)])),
        predict_request("file", b"GIF89a but not really"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_predict_missing_file_field() {
    let (status, body) = send(
        app(StubDetector::new(vec![])),
        predict_request("image", &png_bytes(8, 8)),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "Field required: file");
}

#[tokio::test]
async fn test_predict_requires_multipart() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/predict/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"file": "abc"}"#))
        .unwrap();

    let (status, body) = send(app(StubDetector::new(vec![])), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_predict_rejects_oversized_upload() {
    let config = GatewayConfig {
        max_upload_bytes: 1024,
        ..GatewayConfig::default()
    };
    let app = app_with(Box::new(StubDetector::new(vec![])), config);

    let (status, _) = send(app, predict_request("file", &vec![0u8; 8 * 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_predict_unknown_class_is_server_error() {
    let detector = StubDetector::new(vec![prediction(0.0, 0.0, 42, 0.8)]);
    let (status, body) = send(app(detector), predict_request("file", &png_bytes(8, 8))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("class id 42"));
}

#[tokio::test]
async fn test_predict_detector_failure_is_server_error() {
    let detector = FailingDetector(LabelTable::new(vec!["a".to_string()]));
    let (status, body) = send(app(detector), predict_request("file", &png_bytes(8, 8))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .contains("Unexpected output shape")
    );
}

#[tokio::test]
async fn test_predict_timeout_is_gateway_timeout() {
    let mut detector = StubDetector::new(vec![]);
    detector.delay = Duration::from_millis(500);
    let config = GatewayConfig {
        inference_timeout: Duration::from_millis(25),
        ..GatewayConfig::default()
    };

    let (status, _) = send(
        app_with(Box::new(detector), config),
        predict_request("file", &png_bytes(8, 8)),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_cors_preflight_from_allowed_origin() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/predict/")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app(StubDetector::new(vec![]))
        .oneshot(request)
        .await
        .unwrap();
    let headers = response.headers();

    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
}

#[tokio::test]
async fn test_cors_preflight_from_unknown_origin() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/predict/")
        .header(header::ORIGIN, "https://evil.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app(StubDetector::new(vec![]))
        .oneshot(request)
        .await
        .unwrap();

    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn test_predict_end_to_end_with_yolo_pipeline() {
    // One anchor: cxcywh (320, 320, 100, 100) for class 1 at 0.88, plus a low-score anchor.
    // A 1280x960 upload letterboxes at scale 0.5 with 80px vertical padding.
    let mut output = Array::zeros(IxDyn(&[1, 4 + 3, 2]));
    for (row, value) in [320.0, 320.0, 100.0, 100.0].into_iter().enumerate() {
        output[[0, row, 0]] = value;
        output[[0, row, 1]] = value;
    }
    output[[0, 4 + 1, 0]] = 0.88;
    output[[0, 4 + 2, 1]] = 0.05;

    let labels = LabelTable::new(vec![
        "person".to_string(),
        "bicycle".to_string(),
        "car".to_string(),
    ]);
    let detector = YoloDetector::new(CannedBackend { output }, labels, &DetectorConfig::default());

    let (status, body) = send(app(detector), predict_request("file", &png_bytes(1280, 960))).await;

    assert_eq!(status, StatusCode::OK);
    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1, "Low-confidence anchor is filtered");

    let d = &detections[0];
    assert_eq!(d["name"], "bicycle");
    assert_eq!(d["class_id"], 1);
    assert!(approx(&d["xmin"], 540.0), "{}", d);
    assert!(approx(&d["ymin"], 380.0), "{}", d);
    assert!(approx(&d["xmax"], 740.0), "{}", d);
    assert!(approx(&d["ymax"], 580.0), "{}", d);

    let confidence = d["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(d["xmin"].as_f64() <= d["xmax"].as_f64());
    assert!(d["ymin"].as_f64() <= d["ymax"].as_f64());
}
