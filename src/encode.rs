//! JPEG encoding of annotated frames.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Serializes an annotated frame to compressed image bytes.
///
/// A failure applies to that frame only; publishers skip it and carry on.
pub trait FrameEncode: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// Quality is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl FrameEncode for FrameEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(frame.pixels().len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode(
                frame.pixels(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .with_context(|| {
                format!(
                    "failed to encode frame {} ({}x{}) as JPEG",
                    frame.index,
                    frame.width(),
                    frame.height()
                )
            })?;
        Ok(out)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}
