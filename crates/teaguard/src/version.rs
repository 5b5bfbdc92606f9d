//! Version information for teaguard.

/// Teaguard version from Cargo.toml
pub const TEAGUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with every gateway request.
pub fn user_agent() -> String {
    format!("teaguard/{}", TEAGUARD_VERSION)
}
