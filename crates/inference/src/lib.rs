pub mod backend;
pub mod config;
pub mod detector;
pub mod error;
pub mod labels;
pub mod processing;

// Re-export commonly used types for convenience
pub use backend::{ExecutionProvider, InferenceBackend, InferenceOutput};
pub use config::DetectorConfig;
pub use detector::{Detector, YoloDetector};
pub use error::DetectorError;
pub use labels::LabelTable;
pub use processing::post::Prediction;
