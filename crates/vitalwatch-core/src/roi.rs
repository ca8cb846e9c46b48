//! Regions of interest on the monitor display.
//!
//! ROI coordinates are normalised to the image (0..=1) so one layout works
//! for any capture resolution. [`Roi::pixel_rect`] converts to absolute
//! pixels for cropping.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Vital};

/// A named, normalised rectangle where one vital appears on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Absolute pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(label: &str, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            label: label.to_string(),
            x,
            y,
            width,
            height,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// The vital this ROI reads, if its label is a known one.
    pub fn vital(&self) -> Option<Vital> {
        Vital::from_label(&self.label)
    }

    /// Convert to pixels for an image of `image_width` x `image_height`.
    ///
    /// Coordinates are floored. Returns `None` when the computed width or
    /// height is zero or negative, including after clipping to the image.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<PixelRect> {
        let (w, h) = (f64::from(image_width), f64::from(image_height));
        let left = (self.x * w).floor();
        let top = (self.y * h).floor();
        let width = (self.width * w).floor();
        let height = (self.height * h).floor();
        if width <= 0.0 || height <= 0.0 || !left.is_finite() || !top.is_finite() {
            return None;
        }

        let left = left.clamp(0.0, w);
        let top = top.clamp(0.0, h);
        let width = width.min(w - left);
        let height = height.min(h - top);
        if width <= 0.0 || height <= 0.0 {
            return None;
        }

        Some(PixelRect {
            left: left as u32,
            top: top as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    /// Check that every coordinate lies in `0..=1`.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::RoiOutOfRange {
                    label: self.label.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON array of ROIs.
    pub fn parse_layout(json: &str) -> Result<Vec<Roi>, CoreError> {
        let rois: Vec<Roi> = serde_json::from_str(json)?;
        for roi in &rois {
            roi.validate()?;
        }
        Ok(rois)
    }
}

/// Layout for a standard bedside monitor: numerics stacked in the right-hand
/// column, one row per parameter.
pub fn default_rois() -> Vec<Roi> {
    vec![
        Roi::new("HR", 0.78, 0.04, 0.18, 0.11).with_unit("bpm"),
        Roi::new("Pulse", 0.78, 0.17, 0.18, 0.10).with_unit("bpm"),
        Roi::new("SpO2", 0.78, 0.29, 0.18, 0.11).with_unit("%"),
        Roi::new("ABP", 0.70, 0.42, 0.27, 0.10).with_unit("mmHg"),
        Roi::new("PAP", 0.70, 0.54, 0.27, 0.10).with_unit("mmHg"),
        Roi::new("EtCO2", 0.78, 0.67, 0.18, 0.10).with_unit("mmHg"),
        Roi::new("awRR", 0.78, 0.79, 0.18, 0.10).with_unit("rpm"),
    ]
}
