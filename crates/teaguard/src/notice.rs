//! User-facing notifications raised by the analysis workflow.

use serde::Serialize;

use crate::prediction::PredictionResult;

/// Message shown for every submission failure, whatever the cause.
pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Could not connect to the analysis server. Please ensure the API is running.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn analysis_complete(result: &PredictionResult) -> Self {
        Self {
            kind: NoticeKind::Info,
            title: "Analysis Complete".to_string(),
            description: format!("Detected: {}", result.prediction),
        }
    }

    pub fn analysis_failed() -> Self {
        Self {
            kind: NoticeKind::Destructive,
            title: "Analysis Failed".to_string(),
            description: ANALYSIS_FAILED_MESSAGE.to_string(),
        }
    }
}
