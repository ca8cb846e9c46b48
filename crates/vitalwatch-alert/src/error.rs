use thiserror::Error;

/// Failure to hand an alert to an external channel.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no notification destination configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("throttle ledger: {0}")]
    Ledger(#[from] vitalwatch_store::StoreError),
}
