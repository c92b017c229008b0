use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::FrameRead;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Still images in a directory, played back in file-name order.
pub(crate) struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    open: bool,
}

impl ImageSequenceSource {
    pub(crate) fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
            cursor: 0,
            open: false,
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("cannot open image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "image directory {} contains no frames",
                self.dir.display()
            ));
        }
        files.sort();
        self.files = files;
        self.cursor = 0;
        self.open = true;
        log::debug!(
            "FileSource: opened {} ({} images)",
            self.dir.display(),
            self.files.len()
        );
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<FrameRead> {
        if !self.open {
            return Err(anyhow!("{} is not open", self.dir.display()));
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(FrameRead::EndOfStream);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        match image::open(path) {
            Ok(decoded) => Ok(FrameRead::Frame(Frame::new(decoded.to_rgb8(), index, 0))),
            Err(err) => {
                log::debug!("cannot decode {}: {}", path.display(), err);
                Ok(FrameRead::Undecodable)
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.files.clear();
        self.cursor = 0;
        self.open = false;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}
