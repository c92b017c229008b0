use anyhow::{anyhow, Context, Result};

use super::{FrameRead, FrameSource};
use crate::frame::Frame;

/// Infinite playback over a finite source.
///
/// End-of-stream (or a mid-stream source failure) closes the source and
/// reopens it from the first frame. Undecodable frames are skipped. The only
/// terminal error is a source that cannot be (re)opened, or one that keeps
/// reaching end-of-stream without producing a single frame.
pub struct LoopingSource<S: FrameSource> {
    source: S,
    pass: u64,
    frames_this_pass: u64,
    frames_read: u64,
    undecodable: u64,
    restarts: u64,
}

/// Counters for a looping source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub undecodable: u64,
    pub restarts: u64,
}

impl<S: FrameSource> LoopingSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pass: 0,
            frames_this_pass: 0,
            frames_read: 0,
            undecodable: 0,
            restarts: 0,
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Open the underlying source. Failure is fatal for the owning pipeline.
    pub fn open(&mut self) -> Result<()> {
        self.source
            .open()
            .with_context(|| format!("source unavailable: {}", self.source.describe()))
    }

    pub fn is_open(&self) -> bool {
        self.source.is_open()
    }

    /// Next decoded frame, restarting playback as needed.
    pub fn next_frame(&mut self) -> Result<Frame> {
        if !self.source.is_open() {
            self.open()?;
        }
        let mut empty_passes = 0u32;
        loop {
            let read = match self.source.read() {
                Ok(read) => read,
                Err(err) => {
                    log::debug!(
                        "{}: read failed, restarting playback: {:#}",
                        self.source.describe(),
                        err
                    );
                    FrameRead::EndOfStream
                }
            };
            match read {
                FrameRead::Frame(mut frame) => {
                    frame.pass = self.pass;
                    self.frames_this_pass += 1;
                    self.frames_read += 1;
                    return Ok(frame);
                }
                FrameRead::Undecodable => {
                    self.undecodable += 1;
                    log::debug!("{}: skipping undecodable frame", self.source.describe());
                }
                FrameRead::EndOfStream => {
                    if self.frames_this_pass == 0 {
                        empty_passes += 1;
                        if empty_passes >= 2 {
                            self.source.close();
                            return Err(anyhow!(
                                "source unavailable: {} produced no frames",
                                self.source.describe()
                            ));
                        }
                    }
                    self.restart()?;
                }
            }
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.source.close();
        self.open()?;
        self.pass += 1;
        self.frames_this_pass = 0;
        self.restarts += 1;
        log::debug!(
            "{}: end of stream, restarted playback (pass {})",
            self.source.describe(),
            self.pass
        );
        Ok(())
    }

    pub fn close(&mut self) {
        self.source.close();
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            undecodable: self.undecodable,
            restarts: self.restarts,
        }
    }
}

impl<S: FrameSource> Drop for LoopingSource<S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// Scripted source: `None` entries are undecodable frames.
    struct ScriptedSource {
        script: Vec<Option<u8>>,
        cursor: usize,
        open: bool,
        opens: usize,
        fail_open_after: Option<usize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<u8>>) -> Self {
            Self {
                script,
                cursor: 0,
                open: false,
                opens: 0,
                fail_open_after: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn open(&mut self) -> Result<()> {
            if let Some(limit) = self.fail_open_after {
                if self.opens >= limit {
                    return Err(anyhow!("gone"));
                }
            }
            self.opens += 1;
            self.cursor = 0;
            self.open = true;
            Ok(())
        }

        fn read(&mut self) -> Result<FrameRead> {
            let Some(entry) = self.script.get(self.cursor).copied() else {
                return Ok(FrameRead::EndOfStream);
            };
            let index = self.cursor as u64;
            self.cursor += 1;
            Ok(match entry {
                Some(value) => FrameRead::Frame(Frame::new(
                    RgbImage::from_pixel(2, 2, image::Rgb([value, value, value])),
                    index,
                    0,
                )),
                None => FrameRead::Undecodable,
            })
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn restarts_from_first_frame_after_end_of_stream() -> Result<()> {
        let mut source = LoopingSource::new(ScriptedSource::new(vec![Some(1), Some(2), Some(3)]));
        let mut seen = Vec::new();
        for _ in 0..7 {
            let frame = source.next_frame()?;
            seen.push((frame.index, frame.pass));
        }
        assert_eq!(
            seen,
            vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1), (0, 2)]
        );
        assert_eq!(source.stats().restarts, 2);
        assert_eq!(source.stats().frames_read, 7);
        Ok(())
    }

    #[test]
    fn skips_undecodable_frames() -> Result<()> {
        let mut source = LoopingSource::new(ScriptedSource::new(vec![Some(1), None, Some(3)]));
        assert_eq!(source.next_frame()?.index, 0);
        assert_eq!(source.next_frame()?.index, 2);
        assert_eq!(source.stats().undecodable, 1);
        Ok(())
    }

    #[test]
    fn open_failure_is_reported() {
        let mut scripted = ScriptedSource::new(vec![Some(1)]);
        scripted.fail_open_after = Some(0);
        let mut source = LoopingSource::new(scripted);
        let err = source.next_frame().unwrap_err();
        assert!(format!("{err:#}").contains("source unavailable"));
    }

    #[test]
    fn reopen_failure_ends_playback() -> Result<()> {
        let mut scripted = ScriptedSource::new(vec![Some(1)]);
        scripted.fail_open_after = Some(1);
        let mut source = LoopingSource::new(scripted);
        source.next_frame()?;
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn empty_source_fails_instead_of_spinning() {
        let mut source = LoopingSource::new(ScriptedSource::new(vec![None, None]));
        assert!(source.next_frame().is_err());
        assert!(!source.is_open());
    }
}
