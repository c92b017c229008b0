//! Decoded video frames.
//!
//! A `Frame` owns an RGB pixel buffer plus its position in the playback of the
//! source it came from. Frames are produced fresh by a frame source, mutated in
//! place by the annotator, and dropped after encoding. Nothing retains them.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One decoded frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Zero-based index of this frame within the current playthrough.
    pub index: u64,
    /// Number of completed playthroughs before this frame (0 on first pass).
    pub pass: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, pass: u64) -> Self {
        Self { image, index, pass }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid frame dimensions {}x{}", width, height))?;
        Ok(Self::new(image, index, 0))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 0).is_err());
        let frame = Frame::from_rgb(vec![7u8; 12], 2, 2, 3).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.index, 3);
        assert_eq!(frame.pass, 0);
        assert_eq!(frame.pixels(), &[7u8; 12][..]);
    }
}
