//! Per-viewer stream publisher.
//!
//! A `StreamPublisher` owns one feed's full pipeline for one viewer:
//!
//! ```text
//! LoopingSource -> DetectorBackend -> classify -> StatsAggregator::record
//!               -> Annotator -> FrameEncoder -> multipart chunk -> sink
//! ```
//!
//! Nothing but the `StatsAggregator` is shared with other publishers. The
//! publisher moves through `Opening -> Streaming -> Closed(reason)`; per-frame
//! detector and encoder failures are skipped without leaving `Streaming`.
//! A skipped frame still writes a line break to the sink, so a failed write
//! is noticed as a consumer disconnect on every iteration. Entering `Closed`
//! releases the frame source.

use anyhow::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{Annotator, OverlayKind};
use crate::classify::classify;
use crate::detect::DetectorBackend;
use crate::encode::{FrameEncode, FrameEncoder};
use crate::ingest::{FrameSource, LoopingSource};
use crate::stats::{ClassCounts, StatsAggregator};

/// Multipart boundary separating frames.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Response content type for a frame stream.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Written in place of a skipped frame's chunk.
const KEEP_ALIVE: &[u8] = b"\r\n";

/// Pacing interval for a target rate of `fps` frames per second.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(fps.max(1)))
}

/// One delimited multipart chunk carrying a JPEG image.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The frame source could not be opened or reopened.
    SourceUnavailable(String),
    ConsumerDisconnected,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublisherState {
    Opening,
    Streaming,
    Closed(CloseReason),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub frames_sent: u64,
    /// Frames dropped after a detector, statistics, or encoder failure.
    pub frames_skipped: u64,
    /// Times the source reached end-of-stream and was reopened.
    pub restarts: u64,
}

pub struct StreamPublisher {
    feed: String,
    source: LoopingSource<Box<dyn FrameSource>>,
    detector: Box<dyn DetectorBackend>,
    stats: Arc<StatsAggregator>,
    overlay: OverlayKind,
    annotator: Annotator,
    encoder: Box<dyn FrameEncode>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    state: PublisherState,
    summary: PublishSummary,
}

impl StreamPublisher {
    pub fn new(
        feed: impl Into<String>,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            feed: feed.into(),
            source: LoopingSource::new(source),
            detector,
            stats,
            overlay: OverlayKind::default(),
            annotator: Annotator::default(),
            encoder: Box::new(FrameEncoder::default()),
            interval: frame_interval(30),
            shutdown: Arc::new(AtomicBool::new(false)),
            state: PublisherState::Opening,
            summary: PublishSummary::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayKind) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_encoder<E: FrameEncode + 'static>(mut self, encoder: E) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// Minimum time between emitted frames. Zero disables pacing.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Flag polled once per iteration; when raised the publisher closes.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn state(&self) -> &PublisherState {
        &self.state
    }

    pub fn summary(&self) -> &PublishSummary {
        &self.summary
    }

    pub fn source_is_open(&self) -> bool {
        self.source.is_open()
    }

    /// Acquire the frame source. On failure the publisher is closed.
    pub fn open(&mut self) -> Result<()> {
        if self.state != PublisherState::Opening {
            return Ok(());
        }
        match self.source.open() {
            Ok(()) => {
                self.state = PublisherState::Streaming;
                log::debug!("feed {}: streaming from {}", self.feed, self.source.describe());
                Ok(())
            }
            Err(err) => {
                log::warn!("feed {}: {:#}", self.feed, err);
                self.close(CloseReason::SourceUnavailable(format!("{err:#}")));
                Err(err)
            }
        }
    }

    /// Run the pipeline into `sink` until the consumer goes away, the source
    /// becomes unavailable, or shutdown is requested.
    pub fn stream<W: Write>(&mut self, sink: &mut W) -> PublishSummary {
        if self.state == PublisherState::Opening && self.open().is_err() {
            return self.summary.clone();
        }
        while self.state == PublisherState::Streaming {
            if self.shutdown.load(Ordering::SeqCst) {
                self.close(CloseReason::Shutdown);
                break;
            }
            let started = Instant::now();
            let chunk = match self.next_jpeg() {
                Ok(jpeg) => jpeg.map(|jpeg| multipart_chunk(&jpeg)),
                Err(err) => {
                    log::warn!("feed {}: {:#}", self.feed, err);
                    self.close(CloseReason::SourceUnavailable(format!("{err:#}")));
                    break;
                }
            };
            let bytes = chunk.as_deref().unwrap_or(KEEP_ALIVE);
            if sink.write_all(bytes).and_then(|_| sink.flush()).is_err() {
                self.close(CloseReason::ConsumerDisconnected);
                break;
            }
            if chunk.is_some() {
                self.summary.frames_sent += 1;
            }
            self.pace(started);
        }
        self.summary.clone()
    }

    /// Produce the next annotated JPEG.
    ///
    /// `Ok(None)` means this frame was skipped. `Err` means the source is gone.
    pub fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut frame = self.source.next_frame()?;
        self.summary.restarts = self.source.stats().restarts;

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::debug!(
                    "feed {}: detector {} failed on frame {}: {:#}",
                    self.feed,
                    self.detector.name(),
                    frame.index,
                    err
                );
                self.summary.frames_skipped += 1;
                return Ok(None);
            }
        };
        let classified = classify(detections);
        if let Err(err) = self.stats.record(&self.feed, &classified) {
            log::warn!("feed {}: failed to record stats: {:#}", self.feed, err);
            self.summary.frames_skipped += 1;
            return Ok(None);
        }

        let summary = self.overlay.summary(&ClassCounts::from_detections(&classified));
        self.annotator.annotate(&mut frame, &classified, &summary);

        match self.encoder.encode(&frame) {
            Ok(jpeg) => Ok(Some(jpeg)),
            Err(err) => {
                log::warn!("feed {}: {:#}", self.feed, err);
                self.summary.frames_skipped += 1;
                Ok(None)
            }
        }
    }

    fn pace(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed < self.interval {
            std::thread::sleep(self.interval - elapsed);
        }
    }

    fn close(&mut self, reason: CloseReason) {
        self.source.close();
        log::info!(
            "feed {}: stream closed ({:?}) after {} frames ({} skipped, {} restarts)",
            self.feed,
            reason,
            self.summary.frames_sent,
            self.summary.frames_skipped,
            self.summary.restarts
        );
        self.state = PublisherState::Closed(reason);
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.source.close();
    }
}
