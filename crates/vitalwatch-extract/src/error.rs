use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no API key configured for the vision model")]
    MissingCredentials,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model response contained no JSON object")]
    NoJson,

    #[error("model response had no content")]
    EmptyResponse,

    #[error("expected a JSON object of vitals, got {0}")]
    NotAnObject(&'static str),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("recognizer failed: {0}")]
    Recognizer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker join failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
