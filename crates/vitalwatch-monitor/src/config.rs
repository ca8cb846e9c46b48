use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vitalwatch_core::{Roi, default_rois};

use crate::MonitorError;

/// Pipeline settings. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between frame captures in watch mode.
    pub capture_interval_secs: u64,
    /// Per-extractor deadline; a slower extractor counts as failed.
    pub extractor_timeout_secs: u64,
    /// Minimum spacing between external notifications per (patient, vital).
    pub throttle_window_secs: i64,
    /// Upper bound on one notification send.
    pub delivery_timeout_secs: u64,
    /// Events a slow live subscriber may lag behind before losing some.
    pub broadcast_capacity: usize,
    /// How many recent records are loaded before evaluation.
    pub history_limit: usize,
    pub rois: Vec<Roi>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capture_interval_secs: 3,
            extractor_timeout_secs: 20,
            throttle_window_secs: 300,
            delivery_timeout_secs: 10,
            broadcast_capacity: 256,
            history_limit: 10,
            rois: default_rois(),
        }
    }
}

impl MonitorConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let text = std::fs::read_to_string(path).map_err(|source| MonitorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the ROI layout with one read from a JSON file.
    pub fn with_roi_file(mut self, path: &Path) -> Result<Self, MonitorError> {
        let text = std::fs::read_to_string(path).map_err(|source| MonitorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.rois = Roi::parse_layout(&text)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.capture_interval_secs == 0 {
            return Err(MonitorError::Config("capture_interval_secs must be positive".into()));
        }
        if self.extractor_timeout_secs == 0 {
            return Err(MonitorError::Config("extractor_timeout_secs must be positive".into()));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(MonitorError::Config("delivery_timeout_secs must be positive".into()));
        }
        if self.throttle_window_secs < 0 {
            return Err(MonitorError::Config("throttle_window_secs must not be negative".into()));
        }
        for roi in &self.rois {
            roi.validate()?;
        }
        Ok(())
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs)
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn throttle_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.throttle_window_secs)
    }
}
