//! Tracing setup for hosts embedding the client.
//!
//! - `RUST_LOG`: full filter directives, wins when set and parsable
//! - `TEAGUARD_LOG`: crate level (`trace|debug|info|warn|error`), default `info`
//! - `LOG_FORMAT=json`: JSON lines on stderr instead of text

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

fn filter_directive(level: Option<&str>) -> String {
    let level = level.map(|l| l.trim().to_ascii_lowercase());
    let base_level = match level.as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("teaguard={base_level}")
}

fn env_filter() -> EnvFilter {
    if let Ok(directives) = std::env::var("RUST_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    let level = std::env::var("TEAGUARD_LOG").ok();
    EnvFilter::new(filter_directive(level.as_deref()))
}

/// Install a stderr subscriber. Only the first call in a process has effect.
pub fn init_tracing() {
    let format = LogFormat::parse(std::env::var("LOG_FORMAT").ok().as_deref());

    let output = match format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(output)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(?format, "Tracing initialized");
    }
}
