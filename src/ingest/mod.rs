//! Frame ingestion sources.
//!
//! This module provides the sources a feed can be bound to:
//! - Synthetic `stub://` playthroughs (testing and demo deployments)
//! - Directories of still images, played back in name order
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! Every source implements `FrameSource`, a finite, restartable cursor over
//! decoded frames. `LoopingSource` turns any of them into the infinite
//! playback a stream publisher consumes: end-of-stream closes and reopens the
//! underlying source from the beginning.
//!
//! Sources are never shared. Each stream publisher opens its own instance so
//! decode cursors stay independent between viewers.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod looping;
mod sequence;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use looping::{LoopingSource, SourceStats};

/// Outcome of a single read from a frame source.
pub enum FrameRead {
    /// A decoded frame.
    Frame(Frame),
    /// The next frame exists but could not be decoded. Callers skip it.
    Undecodable,
    /// The source has no more frames until it is reopened.
    EndOfStream,
}

/// A finite, restartable sequence of decoded frames.
pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    /// Open (or reopen) the source at its first frame.
    fn open(&mut self) -> Result<()>;

    /// Decode the next frame.
    ///
    /// An `Err` means the source itself failed mid-stream; `LoopingSource`
    /// treats it like end-of-stream and reopens.
    fn read(&mut self) -> Result<FrameRead>;

    /// Release the underlying handle. Safe to call when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read(&mut self) -> Result<FrameRead> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
