//! Recognition engine: detector + model + registry applied to one frame.

use crate::detector::{CascadeError, DetectionParams, FaceDetector};
use crate::lbph::{LbphModel, ModelError};
use crate::registry::Labels;
use crate::samples::normalize_face;
use crate::types::{Identity, Prediction, RecognitionResult};
use thiserror::Error;

/// Distance at or above which a prediction is rejected as unknown.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error(transparent)]
    Detect(#[from] CascadeError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Resolve a prediction to an identity.
///
/// Accepted only when `distance < threshold` and the predicted id is in the
/// registry; everything else is [`Identity::Unknown`].
pub fn classify(prediction: &Prediction, labels: &Labels, threshold: f64) -> Identity {
    if prediction.distance < threshold {
        if let Some(name) = labels.get(prediction.label) {
            return Identity::Known {
                id: prediction.label,
                name: name.to_string(),
            };
        }
    }
    Identity::Unknown
}

/// Read-only view over a trained model and a registry snapshot.
pub struct RecognitionEngine<'a> {
    detector: &'a dyn FaceDetector,
    model: &'a LbphModel,
    labels: &'a Labels,
    threshold: f64,
}

impl<'a> RecognitionEngine<'a> {
    pub fn new(detector: &'a dyn FaceDetector, model: &'a LbphModel, labels: &'a Labels, threshold: f64) -> Self {
        Self {
            detector,
            model,
            labels,
            threshold,
        }
    }

    /// Identify every face in a grayscale frame.
    pub fn recognize(&self, gray: &[u8], width: u32, height: u32) -> Result<Vec<RecognitionResult>, RecognitionError> {
        let boxes = self.detector.detect(gray, width, height, &DetectionParams::RECOGNITION)?;
        let mut results = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let Some(face) = normalize_face(gray, width, height, &bbox) else {
                continue;
            };
            let prediction = self.model.predict(&face)?;
            let identity = classify(&prediction, self.labels, self.threshold);
            tracing::trace!(
                label = prediction.label,
                distance = prediction.distance,
                name = identity.name(),
                "face classified"
            );
            results.push(RecognitionResult {
                bbox,
                identity,
                confidence: prediction.distance,
            });
        }
        Ok(results)
    }
}
