use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector model unavailable ({path}): {reason}")]
    ModelUnavailable { path: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}
