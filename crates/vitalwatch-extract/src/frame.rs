//! Captured monitor frames.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;

use crate::ExtractError;

/// An encoded image as captured, shared cheaply between extractors.
///
/// Decoding is deferred to the extractors that need pixels, so a frame the
/// OCR path cannot decode may still be sent to the vision model.
#[derive(Debug, Clone)]
pub struct Frame {
    bytes: Arc<[u8]>,
    mime: String,
}

impl Frame {
    /// Wrap encoded image bytes, sniffing the MIME type from the content.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let mime = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "image/jpeg".to_string());
        Self { bytes, mime }
    }

    /// Parse `data:image/...;base64,<data>` or bare base64.
    pub fn from_data_uri(uri: &str) -> Result<Self, ExtractError> {
        let (mime, payload) = match uri.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',').unwrap_or(("", rest));
                let mime = header.split(';').next().filter(|m| !m.is_empty());
                (mime.map(str::to_string), payload)
            }
            None => (None, uri),
        };

        let bytes = STANDARD.decode(payload.trim())?;
        let mut frame = Self::from_bytes(bytes);
        if let Some(mime) = mime {
            frame.mime = mime;
        }
        Ok(frame)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    /// Decode the pixels. CPU-bound; call from a blocking worker.
    pub fn decode(&self) -> Result<DynamicImage, ExtractError> {
        Ok(image::load_from_memory(&self.bytes)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    pub(crate) fn png_frame(width: u32, height: u32) -> Frame {
        let img = RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        Frame::from_bytes(buf.into_inner())
    }

    #[test]
    fn sniffs_png_mime() {
        let frame = png_frame(4, 3);
        assert_eq!(frame.mime(), "image/png");
        let img = frame.decode().unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }

    #[test]
    fn data_uri_round_trip() {
        let frame = png_frame(2, 2);
        let uri = frame.to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));

        let parsed = Frame::from_data_uri(&uri).unwrap();
        assert_eq!(parsed.bytes(), frame.bytes());
        assert_eq!(parsed.mime(), "image/png");
    }

    #[test]
    fn bare_base64_is_accepted() {
        let frame = png_frame(2, 2);
        let bare = STANDARD.encode(frame.bytes());
        let parsed = Frame::from_data_uri(&bare).unwrap();
        assert_eq!(parsed.mime(), "image/png");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let frame = Frame::from_bytes(vec![1u8, 2, 3]);
        assert_eq!(frame.mime(), "image/jpeg");
        assert!(matches!(frame.decode(), Err(ExtractError::Image(_))));
        assert!(matches!(
            Frame::from_data_uri("data:image/png;base64,@@@"),
            Err(ExtractError::Base64(_))
        ));
    }
}
