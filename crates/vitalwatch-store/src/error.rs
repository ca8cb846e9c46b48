use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no results for query")]
    NoResults,

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}
