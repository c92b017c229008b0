//! Local file frame source.
//!
//! `FileSource` binds a feed to a local path and picks a decode backend:
//! - `stub://name?frames=N&width=W&height=H&undecodable=K` generates a
//!   synthetic playthrough of N frames, with every K-th frame undecodable
//! - a directory is played back as an ordered image sequence
//! - anything else is a video container decoded with FFmpeg
//!   (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected; feeds are bound to local media only.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::sequence::ImageSequenceSource;
use super::{FrameRead, FrameSource};
use crate::frame::Frame;

const DEFAULT_STUB_FRAMES: u64 = 90;
const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 360;

/// Configuration for a local file source.
#[derive(Clone, Debug, PartialEq)]
pub struct FileConfig {
    /// Local path, directory, or `stub://` URI.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Sequence(ImageSequenceSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    Unsupported(String),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::parse(&config.path)?)
        } else if Path::new(&config.path).is_dir() {
            FileBackend::Sequence(ImageSequenceSource::new(&config.path))
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::new(config.path.clone()))
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                FileBackend::Unsupported(config.path.clone())
            }
        };
        Ok(Self { backend })
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => source.uri.clone(),
            FileBackend::Sequence(source) => source.describe(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.describe(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unsupported(path) => path.clone(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.open(),
            FileBackend::Sequence(source) => source.open(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.open(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unsupported(path) => {
                if !Path::new(path.as_str()).exists() {
                    return Err(anyhow!("cannot open video {}: no such file", path));
                }
                Err(anyhow!(
                    "cannot open video {}: video decoding requires the ingest-file-ffmpeg feature",
                    path
                ))
            }
        }
    }

    fn read(&mut self) -> Result<FrameRead> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.read(),
            FileBackend::Sequence(source) => source.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unsupported(path) => Err(anyhow!("video {} is not open", path)),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.open = false,
            FileBackend::Sequence(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unsupported(_) => {}
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.open,
            FileBackend::Sequence(source) => source.is_open(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_open(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unsupported(_) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    uri: String,
    frames: u64,
    width: u32,
    height: u32,
    undecodable_every: u64,
    cursor: u64,
    open: bool,
}

impl SyntheticFileSource {
    fn parse(uri: &str) -> Result<Self> {
        let rest = uri.trim_start_matches("stub://");
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        if name.trim().is_empty() {
            return Err(anyhow!("stub source needs a name: {}", uri));
        }
        let mut source = Self {
            uri: uri.to_string(),
            frames: DEFAULT_STUB_FRAMES,
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
            undecodable_every: 0,
            cursor: 0,
            open: false,
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}' in {}", pair, uri))?;
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub parameter '{}' must be an integer in {}", key, uri))?;
            match key {
                "frames" => source.frames = parsed,
                "width" => source.width = parsed as u32,
                "height" => source.height = parsed as u32,
                "undecodable" => source.undecodable_every = parsed,
                other => return Err(anyhow!("unknown stub parameter '{}' in {}", other, uri)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero: {}", uri));
        }
        Ok(source)
    }

    fn open(&mut self) -> Result<()> {
        self.cursor = 0;
        self.open = true;
        log::debug!("FileSource: opened {} (synthetic)", self.uri);
        Ok(())
    }

    fn read(&mut self) -> Result<FrameRead> {
        if !self.open {
            return Err(anyhow!("{} is not open", self.uri));
        }
        if self.cursor >= self.frames {
            return Ok(FrameRead::EndOfStream);
        }
        let index = self.cursor;
        self.cursor += 1;
        if self.undecodable_every > 0 && (index + 1) % self.undecodable_every == 0 {
            return Ok(FrameRead::Undecodable);
        }
        Ok(FrameRead::Frame(Frame::new(self.render(index), index, 0)))
    }

    fn render(&self, index: u64) -> RgbImage {
        let shift = (index * 3) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let sky = (y * 160 / self.height.max(1)) as u8;
            let ground = ((x + shift) % 64) as u8;
            Rgb([40 + sky / 2, 60 + ground, 30 + sky])
        })
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_frame(source: &mut FileSource) -> Frame {
        match source.read().unwrap() {
            FrameRead::Frame(frame) => frame,
            FrameRead::Undecodable => panic!("unexpected undecodable frame"),
            FrameRead::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn rejects_remote_urls() {
        assert!(FileSource::new(FileConfig::new("rtsp://camera/stream")).is_err());
        assert!(FileSource::new(FileConfig::new("  ")).is_err());
    }

    #[test]
    fn stub_source_ends_after_configured_frames() -> Result<()> {
        let mut source =
            FileSource::new(FileConfig::new("stub://test?frames=2&width=8&height=4"))?;
        source.open()?;
        let frame = read_frame(&mut source);
        assert_eq!((frame.width(), frame.height(), frame.index), (8, 4, 0));
        assert_eq!(read_frame(&mut source).index, 1);
        assert!(matches!(source.read()?, FrameRead::EndOfStream));

        source.close();
        assert!(!source.is_open());
        source.open()?;
        assert_eq!(read_frame(&mut source).index, 0);
        Ok(())
    }

    #[test]
    fn stub_source_marks_undecodable_frames() -> Result<()> {
        let mut source = FileSource::new(FileConfig::new(
            "stub://test?frames=4&width=4&height=4&undecodable=2",
        ))?;
        source.open()?;
        assert!(matches!(source.read()?, FrameRead::Frame(_)));
        assert!(matches!(source.read()?, FrameRead::Undecodable));
        assert!(matches!(source.read()?, FrameRead::Frame(_)));
        assert!(matches!(source.read()?, FrameRead::Undecodable));
        assert!(matches!(source.read()?, FrameRead::EndOfStream));
        Ok(())
    }

    #[test]
    fn stub_source_rejects_unknown_parameters() {
        assert!(FileSource::new(FileConfig::new("stub://test?fps=3")).is_err());
        assert!(FileSource::new(FileConfig::new("stub://test?frames=many")).is_err());
        assert!(FileSource::new(FileConfig::new("stub://?frames=3")).is_err());
    }

    #[test]
    fn missing_video_cannot_be_opened() -> Result<()> {
        let mut source = FileSource::new(FileConfig::new("/nonexistent/drone_civilian.mp4"))?;
        assert!(source.open().is_err());
        assert!(!source.is_open());
        Ok(())
    }
}
