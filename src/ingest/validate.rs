//! Frame validation: base64 unwrapping, JPEG decoding and optional re-encoding.
//!
//! Everything here is pure; the persistence worker decides what to do with
//! the result.

use std::borrow::Cow;
use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::core::error::{FrameResult, SubmitError};
use crate::store::is_valid_camera_id;

/// Synchronous checks shared by `submit` and the worker.
pub fn check_submission(camera_id: &str, payload: &[u8]) -> Result<(), SubmitError> {
    if camera_id.is_empty() {
        return Err(SubmitError::EmptyCameraId);
    }
    if !is_valid_camera_id(camera_id) {
        return Err(SubmitError::InvalidCameraId(camera_id.to_string()));
    }
    if payload.is_empty() {
        return Err(SubmitError::EmptyPayload);
    }
    Ok(())
}

/// Heuristic: standard alphabet, length a multiple of 4, padding only at the end.
pub fn looks_like_base64(data: &[u8]) -> bool {
    if data.is_empty() || data.len() % 4 != 0 {
        return false;
    }
    let body_len = data.len() - data.iter().rev().take(2).take_while(|&&b| b == b'=').count();
    data[..body_len]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Returns the image bytes, decoding base64 text payloads. Whitespace around
/// base64 text (a trailing newline from a line-based sender) is ignored.
pub fn decode_payload(payload: &[u8]) -> FrameResult<Cow<'_, [u8]>> {
    let text = payload.trim_ascii();
    if looks_like_base64(text) {
        Ok(Cow::Owned(STANDARD.decode(text)?))
    } else {
        Ok(Cow::Borrowed(payload))
    }
}

pub fn decode_jpeg(bytes: &[u8]) -> FrameResult<DynamicImage> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?)
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> FrameResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out.into_inner())
}

/// A frame that passed validation and is ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameValidator {
    reencode_quality: Option<u8>,
}

impl FrameValidator {
    /// `Some(q)` re-encodes every frame at JPEG quality `q`; `None` keeps the
    /// validated bytes.
    pub fn new(reencode_quality: Option<u8>) -> Self {
        Self { reencode_quality }
    }

    pub fn prepare(&self, payload: &[u8]) -> FrameResult<PreparedFrame> {
        let bytes = decode_payload(payload)?;
        let image = decode_jpeg(&bytes)?;
        let (width, height) = (image.width(), image.height());

        let bytes = match self.reencode_quality {
            Some(quality) => encode_jpeg(&image, quality)?,
            None => bytes.into_owned(),
        };

        Ok(PreparedFrame {
            bytes,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FrameError;
    use crate::testing::jpeg_fixture;

    #[test]
    fn base64_heuristic() {
        assert!(looks_like_base64(b"QUJD"));
        assert!(looks_like_base64(b"QUI="));
        assert!(looks_like_base64(b"QQ=="));
        assert!(!looks_like_base64(b""));
        assert!(!looks_like_base64(b"QUJ"));
        assert!(!looks_like_base64(b"Q=JD"));
        assert!(!looks_like_base64(b"Q==="));
        assert!(!looks_like_base64(&[0xFF, 0xD8, 0xFF, 0xE0]));
    }

    #[test]
    fn raw_and_base64_payloads_decode_to_same_image() {
        let jpeg = jpeg_fixture(32, 24, 3);
        let encoded = STANDARD.encode(&jpeg);

        let validator = FrameValidator::new(None);
        let raw = validator.prepare(&jpeg).unwrap();
        let text = validator.prepare(encoded.as_bytes()).unwrap();

        assert_eq!(raw.bytes, jpeg);
        assert_eq!(text.bytes, jpeg);
        assert_eq!((raw.width, raw.height), (32, 24));
    }

    #[test]
    fn base64_with_surrounding_whitespace_decodes() {
        let jpeg = jpeg_fixture(16, 16, 7);
        let padded = format!("  {}\r\n", STANDARD.encode(&jpeg));

        let prepared = FrameValidator::new(None).prepare(padded.as_bytes()).unwrap();
        assert_eq!(prepared.bytes, jpeg);
    }

    #[test]
    fn reencode_keeps_dimensions() {
        let jpeg = jpeg_fixture(40, 30, 1);
        let prepared = FrameValidator::new(Some(90)).prepare(&jpeg).unwrap();
        let decoded = decode_jpeg(&prepared.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = FrameValidator::new(Some(90))
            .prepare(b"definitely not a jpeg")
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidImage(_)));

        // valid base64, but the content is not an image
        let err = FrameValidator::new(None).prepare(b"QUJD").unwrap_err();
        assert!(matches!(err, FrameError::InvalidImage(_)));
    }

    #[test]
    fn submission_checks() {
        assert_eq!(check_submission("", b"x"), Err(SubmitError::EmptyCameraId));
        assert_eq!(check_submission("cam-1", b""), Err(SubmitError::EmptyPayload));
        assert_eq!(
            check_submission("../etc", b"x"),
            Err(SubmitError::InvalidCameraId("../etc".to_string()))
        );
        assert_eq!(check_submission("cam-1", b"x"), Ok(()));
    }
}
