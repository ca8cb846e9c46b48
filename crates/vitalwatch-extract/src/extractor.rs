use async_trait::async_trait;
use vitalwatch_core::{Extraction, Roi};

use crate::Frame;

/// A source of raw readings for the ROIs of a frame.
///
/// Implementations never return an error: any failure of the whole call is
/// reported as [`Extraction::Failed`], and failures of a single ROI as a
/// per-label [`Reading::Failed`](vitalwatch_core::Reading::Failed).
#[async_trait]
pub trait RegionExtractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn extract(&self, frame: &Frame, rois: &[Roi]) -> Extraction;
}
