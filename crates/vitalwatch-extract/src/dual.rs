//! Concurrent fan-out to both extractors, joined before fusion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use vitalwatch_core::{Extraction, PatientId, Roi, VitalSource, VitalsSnapshot};

use crate::{Frame, RegionExtractor, fusion};

/// Results of one dual extraction, kept for diagnostics next to the fused
/// snapshot.
#[derive(Debug, Clone)]
pub struct DualOutcome {
    pub model: Extraction,
    pub pattern: Extraction,
    pub snapshot: VitalsSnapshot,
}

/// Runs the model and pattern extractors side by side.
///
/// Each call has its own timeout; a call that exceeds it counts as
/// [`Extraction::Failed`] so one slow source never holds up the snapshot.
pub struct DualExtractor {
    model: Arc<dyn RegionExtractor>,
    pattern: Arc<dyn RegionExtractor>,
    model_timeout: Duration,
    pattern_timeout: Duration,
}

impl DualExtractor {
    pub fn new(
        model: Arc<dyn RegionExtractor>,
        pattern: Arc<dyn RegionExtractor>,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            pattern,
            model_timeout: timeout,
            pattern_timeout: timeout,
        }
    }

    pub fn with_timeouts(mut self, model: Duration, pattern: Duration) -> Self {
        self.model_timeout = model;
        self.pattern_timeout = pattern;
        self
    }

    /// Extract with both sources concurrently, then fuse.
    pub async fn run(
        &self,
        frame: &Frame,
        rois: &[Roi],
        patient_id: Option<PatientId>,
        timestamp: DateTime<Utc>,
        source: VitalSource,
    ) -> DualOutcome {
        let start = Instant::now();
        let (model, pattern) = tokio::join!(
            bounded(self.model.as_ref(), frame, rois, self.model_timeout),
            bounded(self.pattern.as_ref(), frame, rois, self.pattern_timeout),
        );

        let snapshot = fusion::select(&model, &pattern, patient_id, timestamp, source);
        info!(
            model_ok = !model.is_failed(),
            pattern_ok = !pattern.is_failed(),
            fields = snapshot.values().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dual extraction settled"
        );
        DualOutcome {
            model,
            pattern,
            snapshot,
        }
    }
}

async fn bounded(
    extractor: &dyn RegionExtractor,
    frame: &Frame,
    rois: &[Roi],
    timeout: Duration,
) -> Extraction {
    match tokio::time::timeout(timeout, extractor.extract(frame, rois)).await {
        Ok(extraction) => extraction,
        Err(_) => {
            warn!(
                extractor = extractor.name(),
                timeout_ms = timeout.as_millis() as u64,
                "extractor timed out"
            );
            Extraction::failed(format!("timed out after {}ms", timeout.as_millis()))
        }
    }
}
