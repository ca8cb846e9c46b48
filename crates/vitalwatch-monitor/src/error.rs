use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("storage error: {0}")]
    Store(#[from] vitalwatch_store::StoreError),

    #[error("frame error: {0}")]
    Frame(#[from] vitalwatch_extract::ExtractError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] vitalwatch_core::CoreError),
}
