//! Pattern-based extractor: crop each ROI and run digit recognition on it.
//!
//! ROIs are converted from normalised to absolute pixel rectangles. ROIs that
//! come out empty are skipped without emitting a key; a crop or recognition
//! failure affects only its own ROI. Recognised text is reduced to digits
//! and `/`.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use image::ImageFormat;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use vitalwatch_core::{Extraction, RawExtraction, Reading, Roi, Vital, VitalValue};

use crate::{ExtractError, Frame, RegionExtractor};

const DIGIT_WHITELIST: &str = "0123456789/";

/// Character recognition over a single cropped region.
#[async_trait]
pub trait CharacterRecognizer: Send + Sync {
    /// Recognise text in a PNG-encoded crop.
    async fn recognize(&self, png: Vec<u8>) -> Result<String, ExtractError>;
}

/// Runs the `tesseract` executable in single-line mode, restricted to
/// digits and `/`.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: PathBuf,
    page_segmentation_mode: u8,
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractRecognizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            page_segmentation_mode: 7,
        }
    }
}

#[async_trait]
impl CharacterRecognizer for TesseractRecognizer {
    async fn recognize(&self, png: Vec<u8>) -> Result<String, ExtractError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--psm"])
            .arg(self.page_segmentation_mode.to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={DIGIT_WHITELIST}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ExtractError::Recognizer(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Region extractor that crops and recognises each ROI independently.
pub struct PatternExtractor {
    recognizer: Arc<dyn CharacterRecognizer>,
}

impl PatternExtractor {
    pub fn new(recognizer: Arc<dyn CharacterRecognizer>) -> Self {
        Self { recognizer }
    }

    async fn run(&self, frame: &Frame, rois: &[Roi]) -> Result<RawExtraction, ExtractError> {
        let frame = frame.clone();
        let targets: Vec<(Vital, Roi)> = rois
            .iter()
            .filter_map(|roi| match roi.vital() {
                Some(vital) => Some((vital, roi.clone())),
                None => {
                    debug!(label = %roi.label, "skipping ROI with unknown label");
                    None
                }
            })
            .collect();

        let crops = tokio::task::spawn_blocking(move || crop_regions(&frame, &targets)).await??;

        let recognitions = crops.into_iter().map(|(vital, crop)| async move {
            let reading = match crop {
                Ok(png) => match self.recognizer.recognize(png).await {
                    Ok(text) => Reading::from(Some(VitalValue::Text(clean_digits(&text)))),
                    Err(err) => {
                        warn!(vital = %vital, error = %err, "recognition failed for ROI");
                        Reading::Failed(err.to_string())
                    }
                },
                Err(err) => {
                    warn!(vital = %vital, error = %err, "crop failed for ROI");
                    Reading::Failed(err.to_string())
                }
            };
            (vital, reading)
        });

        let mut raw = RawExtraction::new();
        for (vital, reading) in join_all(recognitions).await {
            raw.insert(vital, reading);
        }
        Ok(raw)
    }
}

#[async_trait]
impl RegionExtractor for PatternExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract(&self, frame: &Frame, rois: &[Roi]) -> Extraction {
        match self.run(frame, rois).await {
            Ok(raw) => {
                info!(labels = raw.len(), "pattern extraction complete");
                Extraction::Values(raw)
            }
            Err(err) => {
                warn!(error = %err, "pattern extraction failed");
                Extraction::failed(err.to_string())
            }
        }
    }
}

type Crop = Result<Vec<u8>, ExtractError>;

/// Decode the frame once and PNG-encode each non-empty ROI crop.
fn crop_regions(frame: &Frame, targets: &[(Vital, Roi)]) -> Result<Vec<(Vital, Crop)>, ExtractError> {
    let image = frame.decode()?;
    let (width, height) = (image.width(), image.height());

    let crops = targets
        .iter()
        .filter_map(|(vital, roi)| {
            let Some(rect) = roi.pixel_rect(width, height) else {
                debug!(vital = %vital, "ROI has no area at this resolution, skipping");
                return None;
            };
            let region = image.crop_imm(rect.left, rect.top, rect.width, rect.height);
            let mut buf = Cursor::new(Vec::new());
            let crop = region
                .write_to(&mut buf, ImageFormat::Png)
                .map(|_| buf.into_inner())
                .map_err(ExtractError::from);
            Some((*vital, crop))
        })
        .collect();
    Ok(crops)
}

/// Keep only digits and `/`.
pub fn clean_digits(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || *c == '/')
        .collect()
}
