//! Where watch mode gets its frames from.

use std::path::PathBuf;

use async_trait::async_trait;
use vitalwatch_extract::Frame;

use crate::MonitorError;

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab the current frame.
    async fn capture(&self) -> Result<Frame, MonitorError>;
}

/// Re-reads one file on every capture, e.g. a snapshot an external camera
/// process keeps overwriting.
///
/// The file may hold raw image bytes or a `data:` URI.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn read(&self) -> Result<Frame, MonitorError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| MonitorError::Read {
                path: self.path.clone(),
                source,
            })?;
        if bytes.starts_with(b"data:") {
            let text = String::from_utf8_lossy(&bytes);
            return Ok(Frame::from_data_uri(text.trim())?);
        }
        Ok(Frame::from_bytes(bytes))
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn capture(&self) -> Result<Frame, MonitorError> {
        self.read().await
    }
}
