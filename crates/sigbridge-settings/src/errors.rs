//! Settings errors.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("settings file unreadable: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not JSON, or does not fit [`BridgeSettings`](crate::BridgeSettings).
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value failed validation after merging.
    #[error("bad setting: {0}")]
    Invalid(String),
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;
