//! Drone Surveillance Stream Server
//!
//! Pulls frames from fixed video feeds, runs an object detector over every
//! frame, draws the recognised entities, and republishes the annotated frames
//! as MJPEG streams to any number of concurrent viewers. Running counts of
//! detected civilians and soldiers are kept per feed.
//!
//! # Architecture
//!
//! Every viewer gets a private pipeline (`StreamPublisher`) with its own frame
//! source and detector instance. The only state shared between pipelines is
//! the `StatsAggregator`, guarded by a single mutex:
//!
//! 1. **Unique-identity counts**: in cumulative mode a tracked entity is
//!    counted once per feed, no matter how many frames it appears in.
//! 2. **Atomic reset**: a reset clears counts and identity sets of every feed
//!    at once; no snapshot observes a half-cleared state.
//! 3. **Stream liveness**: end-of-file reopens the source; undecodable frames
//!    and per-frame detector or encoder failures are skipped.
//! 4. **No leaks**: a disconnected viewer's pipeline closes within one frame
//!    and releases its source.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic `stub://`, image directories, video files)
//! - `detect`: Detector backends, registry, IoU tracking
//! - `classify`: Class id to civilian/soldier mapping
//! - `stats`: Per-feed statistics aggregation
//! - `annotate` / `encode`: Overlay drawing and JPEG encoding
//! - `stream`: Per-viewer publisher state machine and multipart framing
//! - `feeds` / `config` / `api`: Feed table, configuration, HTTP surface

pub mod annotate;
pub mod api;
pub mod classify;
pub mod config;
pub mod detect;
pub mod encode;
pub mod feeds;
pub mod frame;
pub mod ingest;
pub mod stats;
pub mod stream;

pub use annotate::{Annotator, OverlayKind};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use classify::{classify, ClassifiedDetection, EntityClass};
pub use config::{DetectorSettings, FeedSettings, StreamSettings, SurveildConfig};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend};
pub use encode::{FrameEncode, FrameEncoder};
pub use feeds::Surveillance;
pub use frame::Frame;
pub use ingest::{FileConfig, FileSource, FrameRead, FrameSource, LoopingSource};
pub use stats::{ClassCounts, CountingMode, StatsAggregator, StatsSnapshot};
pub use stream::{CloseReason, PublishSummary, PublisherState, StreamPublisher};
