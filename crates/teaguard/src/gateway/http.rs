//! HTTP gateway backed by a pooled reqwest client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};

use super::{Gateway, GatewayError, Submission};
use crate::config::{ClientConfig, ConfigError};
use crate::prediction::PredictionResult;
use crate::version::user_agent;

pub struct HttpGateway {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

fn network_error(e: reqwest::Error) -> GatewayError {
    GatewayError::NetworkUnreachable(e.to_string())
}

fn service_error(status: StatusCode) -> GatewayError {
    GatewayError::ServiceError {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

fn image_part(submission: &Submission) -> Part {
    let part = Part::bytes(submission.bytes.to_vec()).file_name(submission.filename.clone());

    // An unparsable media type is sent without a Content-Type rather than dropped.
    match part.mime_str(&submission.media_type) {
        Ok(part) => part,
        Err(e) => {
            tracing::warn!(
                error = %e,
                media_type = %submission.media_type,
                "Uploading without media type"
            );
            Part::bytes(submission.bytes.to_vec()).file_name(submission.filename.clone())
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn probe_liveness(&self) -> bool {
        let url = self.config.url_for(&self.config.probe_path);
        match self.client.head(&url).send().await {
            Ok(response) => {
                let status = response.status();
                let up = status.is_success() || status.is_redirection();
                tracing::debug!(status = %status, up, "Liveness probe completed");
                up
            }
            Err(e) => {
                tracing::debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    async fn submit_for_prediction(
        &self,
        submission: &Submission,
    ) -> Result<PredictionResult, GatewayError> {
        let url = self.config.url_for(&self.config.predict_path);
        let form = Form::new().part(self.config.upload_field.clone(), image_part(submission));

        tracing::debug!(
            filename = %submission.filename,
            media_type = %submission.media_type,
            size = submission.bytes.len(),
            "Submitting image"
        );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(service_error(status));
        }

        let body = response.bytes().await.map_err(network_error)?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::DecodeError(e.to_string()))
    }

    async fn fetch_derived_image(&self, reference: &str) -> Result<Bytes, GatewayError> {
        let url = self.config.url_for(reference);
        let mut request = self.client.get(&url);

        if let Some((name, value)) = &self.config.bypass_header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(service_error(status));
        }

        response.bytes().await.map_err(network_error)
    }
}
