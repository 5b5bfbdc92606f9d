//! Remote service gateway.
//!
//! The gateway is the only component that performs network I/O against the
//! analysis server. It exposes three operations:
//! - liveness probe (never fails, answers up/down)
//! - submit an image for prediction
//! - fetch the derived Grad-CAM image referenced by a result
//!
//! No retries happen here; retry policy belongs to the caller.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use bytes::Bytes;

use crate::prediction::PredictionResult;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Analysis server unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Analysis server returned {status}: {reason}")]
    ServiceError { status: u16, reason: String },

    #[error("Malformed response from analysis server: {0}")]
    DecodeError(String),
}

/// Image payload handed to the gateway for classification.
#[derive(Debug, Clone)]
pub struct Submission {
    pub bytes: Bytes,
    pub media_type: String,
    pub filename: String,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Lightweight reachability check. Any failure reads as `false`.
    async fn probe_liveness(&self) -> bool;

    async fn submit_for_prediction(
        &self,
        submission: &Submission,
    ) -> Result<PredictionResult, GatewayError>;

    /// Fetch raw bytes for a server-relative reference.
    async fn fetch_derived_image(&self, reference: &str) -> Result<Bytes, GatewayError>;
}
