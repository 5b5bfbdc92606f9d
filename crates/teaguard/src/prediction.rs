//! Prediction result returned by the analysis server.

use serde::{Deserialize, Serialize};

/// Diagnosis for one submitted image.
///
/// `confidence` is whatever scalar the service reports; it is not guaranteed
/// to be normalized and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub filename: String,
    pub prediction: String,
    pub confidence: f64,
    /// Server-relative path of the Grad-CAM attention map.
    pub gradcam_image: String,
}

impl PredictionResult {
    /// Whether the predicted label names a healthy leaf.
    pub fn is_healthy(&self) -> bool {
        self.prediction.to_lowercase().contains("healthy")
    }
}
