use crate::{
    backend::{InferenceBackend, InferenceOutput},
    config::DetectorConfig,
    error::DetectorError,
    labels::LabelTable,
    processing::{
        post::{PostProcessor, Prediction, TransformParams},
        pre::PreProcessor,
    },
};
use image::DynamicImage;

/// Metadata key under which Ultralytics exports store the class names.
const NAMES_METADATA_KEY: &str = "names";

/// A loaded detection model. Implementations are shared across requests behind a lock.
pub trait Detector: Send {
    /// Run the model on a single image. Predictions are in original image pixels.
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Prediction>, DetectorError>;

    /// Class id to name mapping of the loaded model.
    fn labels(&self) -> &LabelTable;
}

pub struct YoloDetector<B: InferenceBackend> {
    backend: B,
    labels: LabelTable,
    preprocessor: PreProcessor,
    postprocessor: PostProcessor,
}

impl<B: InferenceBackend> YoloDetector<B> {
    pub fn new(backend: B, labels: LabelTable, config: &DetectorConfig) -> Self {
        Self {
            backend,
            labels,
            preprocessor: PreProcessor::new(config.input_size),
            postprocessor: PostProcessor::new(
                config.confidence_threshold,
                config.iou_threshold,
                config.max_detections,
            ),
        }
    }

    /// Load the model and its label table. Any failure is `ModelUnavailable`.
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let unavailable = |e: anyhow::Error| DetectorError::ModelUnavailable {
            path: config.model_path.clone(),
            reason: format!("{:#}", e),
        };

        let backend = B::load_model(config).map_err(unavailable)?;
        let labels = resolve_labels(&backend, config).map_err(unavailable)?;

        tracing::info!(classes = labels.len(), "Label table loaded");

        Ok(Self::new(backend, labels, config))
    }
}

fn resolve_labels<B: InferenceBackend>(
    backend: &B,
    config: &DetectorConfig,
) -> anyhow::Result<LabelTable> {
    if let Some(path) = &config.labels_path {
        tracing::debug!(path = %path, "Reading labels file");
        return LabelTable::from_file(path);
    }

    match backend.metadata(NAMES_METADATA_KEY)? {
        Some(raw) => LabelTable::from_ultralytics_names(&raw),
        None => anyhow::bail!("Model has no embedded class names and no labels file was given"),
    }
}

impl<B: InferenceBackend> Detector for YoloDetector<B> {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Prediction>, DetectorError> {
        let rgb = image.to_rgb8();

        let (input, letterbox) = self.preprocessor.preprocess(&rgb)?;

        let InferenceOutput { predictions } = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            self.backend.infer(&input)?
        };

        let transform = TransformParams {
            orig_width: rgb.width(),
            orig_height: rgb.height(),
            letterbox,
        };

        Ok(self
            .postprocessor
            .parse_predictions(&predictions.view(), &transform)?)
    }

    fn labels(&self) -> &LabelTable {
        &self.labels
    }
}
