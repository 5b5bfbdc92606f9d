//! Client configuration.
//!
//! Defaults come from the environment so deployments can point the client at
//! a different analysis server without code changes:
//! - `TEAGUARD_API_BASE_URL`: service base location
//! - `TEAGUARD_REQUEST_TIMEOUT`: per-request timeout in seconds
//! - `TEAGUARD_POLL_INTERVAL`: liveness poll interval in seconds

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Header that makes the ngrok tunnel skip its browser warning page.
pub const BYPASS_HEADER_NAME: &str = "ngrok-skip-browser-warning";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid bypass header '{name}'")]
    InvalidHeader { name: String },

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub probe_path: String,
    pub predict_path: String,
    /// Multipart field carrying the image on submission.
    pub upload_field: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Sent on derived-image fetches only.
    pub bypass_header: Option<(String, String)>,
}

/// Parse a positive number of seconds. Values that round to zero or do not
/// fit in a `Duration` are rejected.
fn parse_seconds(raw: &str) -> Option<Duration> {
    let seconds = raw.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
}

fn env_seconds(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => parse_seconds(&raw).unwrap_or_else(|| {
            tracing::warn!(var = name, value = %raw, ?default, "Ignoring invalid duration");
            default
        }),
        Err(_) => default,
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("TEAGUARD_API_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            probe_path: "/docs".to_string(),
            predict_path: "/predict".to_string(),
            upload_field: "image".to_string(),
            request_timeout: env_seconds("TEAGUARD_REQUEST_TIMEOUT", Duration::from_secs(30)),
            poll_interval: env_seconds("TEAGUARD_POLL_INTERVAL", Duration::from_secs(30)),
            bypass_header: Some((BYPASS_HEADER_NAME.to_string(), "true".to_string())),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn without_bypass_header(mut self) -> Self {
        self.bypass_header = None;
        self
    }

    /// Check the base URL and bypass header before any request is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "request_timeout",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "poll_interval",
            });
        }

        let url =
            reqwest::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if let Some((name, value)) = &self.bypass_header {
            let valid = HeaderName::from_bytes(name.as_bytes()).is_ok()
                && HeaderValue::from_str(value).is_ok();
            if !valid {
                return Err(ConfigError::InvalidHeader { name: name.clone() });
            }
        }

        Ok(())
    }

    /// Resolve a server-relative path against the base location.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}
