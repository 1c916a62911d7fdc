use crate::processing::pre::Letterbox;
use common::span_debug;
use ndarray::Axis;

/// Number of box coordinate rows preceding the class scores.
const BOX_ROWS: usize = 4;

pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub letterbox: Letterbox,
}

/// One box reported by the detector, in original image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl Prediction {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Prediction) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 { 0.0 } else { intersection / union }
    }
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            max_detections,
        }
    }

    /// Decode YOLO output into predictions ordered by descending confidence.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn parse_predictions(
        &self,
        output: &ndarray::ArrayViewD<f32>, // [1, 4 + num_classes, num_anchors] cxcywh in input pixels
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<Prediction>> {
        let shape = output.shape();
        anyhow::ensure!(
            shape.len() == 3 && shape[0] == 1,
            "Unexpected output shape {:?}, expected [1, 4 + classes, anchors]",
            shape
        );
        anyhow::ensure!(
            shape[1] > BOX_ROWS,
            "Output has {} rows, expected box coordinates followed by class scores",
            shape[1]
        );

        let output = output.index_axis(Axis(0), 0);
        let num_classes = shape[1] - BOX_ROWS;
        let num_anchors = shape[2];

        let mut candidates = Vec::new();

        for i in 0..num_anchors {
            // argmax over class scores
            let mut confidence = f32::NEG_INFINITY;
            let mut class_idx = 0usize;
            for c in 0..num_classes {
                let score = output[[BOX_ROWS + c, i]];
                if score > confidence {
                    confidence = score;
                    class_idx = c;
                }
            }

            if confidence.is_nan() || confidence < self.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (output[[0, i]], output[[1, i]], output[[2, i]], output[[3, i]]);
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(cx, cy, w, h);
            let (x1, y1) = to_original(x1, y1, transform);
            let (x2, y2) = to_original(x2, y2, transform);

            candidates.push(Prediction {
                x1: x1.min(x2),
                y1: y1.min(y2),
                x2: x1.max(x2),
                y2: y1.max(y2),
                confidence: confidence.min(1.0),
                class_id: class_idx as u32,
            });
        }

        tracing::trace!(
            anchors = num_anchors,
            candidates = candidates.len(),
            "Candidates above threshold"
        );

        Ok(non_maximum_suppression(
            candidates,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

/// Class-aware greedy NMS. Returns at most `max_detections` boxes, highest confidence first.
pub fn non_maximum_suppression(
    mut predictions: Vec<Prediction>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Prediction> {
    let _s = span_debug!("non_maximum_suppression");

    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Prediction> = Vec::with_capacity(predictions.len().min(max_detections));
    for candidate in predictions {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

/// Inverse letterbox transform, clamped to the original image bounds
#[inline]
fn to_original(x: f32, y: f32, transform: &TransformParams) -> (f32, f32) {
    let lb = &transform.letterbox;
    let x = ((x - lb.offset_x) / lb.scale).clamp(0.0, transform.orig_width as f32);
    let y = ((y - lb.offset_y) / lb.scale).clamp(0.0, transform.orig_height as f32);
    (x, y)
}
