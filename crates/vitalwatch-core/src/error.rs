use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown vital label: {0}")]
    UnknownVital(String),

    #[error("ROI {label} has coordinate {field}={value} outside 0..=1")]
    RoiOutOfRange {
        label: String,
        field: &'static str,
        value: f64,
    },

    #[error("ROI layout JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
