//! Static feed table and per-viewer pipeline construction.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::{FeedSettings, StreamSettings, SurveildConfig};
use crate::detect::BackendRegistry;
use crate::encode::FrameEncoder;
use crate::ingest::{FileConfig, FileSource};
use crate::stats::StatsAggregator;
use crate::stream::StreamPublisher;

/// The configured feeds plus everything a viewer's pipeline is built from.
///
/// Feeds are fixed at construction. The statistics aggregator is the only
/// state handed to more than one publisher.
pub struct Surveillance {
    feeds: Vec<FeedSettings>,
    default_feed: String,
    stats: Arc<StatsAggregator>,
    detectors: BackendRegistry,
    stream: StreamSettings,
}

impl Surveillance {
    pub fn from_config(cfg: &SurveildConfig) -> Result<Self> {
        let detectors = BackendRegistry::from_settings(&cfg.detector)?;
        Self::new(
            cfg.feeds.clone(),
            &cfg.default_feed,
            detectors,
            cfg.stream.clone(),
        )
    }

    pub fn new(
        feeds: Vec<FeedSettings>,
        default_feed: &str,
        detectors: BackendRegistry,
        stream: StreamSettings,
    ) -> Result<Self> {
        if !feeds.iter().any(|feed| feed.name == default_feed) {
            return Err(anyhow!("default feed '{}' is not configured", default_feed));
        }
        let stats = Arc::new(StatsAggregator::new(
            feeds.iter().map(|feed| (feed.name.clone(), feed.counting)),
        ));
        Ok(Self {
            feeds,
            default_feed: default_feed.to_string(),
            stats,
            detectors,
            stream,
        })
    }

    pub fn feeds(&self) -> &[FeedSettings] {
        &self.feeds
    }

    pub fn feed(&self, name: &str) -> Option<&FeedSettings> {
        self.feeds.iter().find(|feed| feed.name == name)
    }

    pub fn default_feed(&self) -> &str {
        &self.default_feed
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn detectors(&self) -> &BackendRegistry {
        &self.detectors
    }

    /// Build a fresh, unopened publisher for one viewer of `feed`.
    ///
    /// Every call creates its own frame source and detector instance.
    pub fn open_publisher(&self, feed: &str, shutdown: Arc<AtomicBool>) -> Result<StreamPublisher> {
        let settings = self
            .feed(feed)
            .ok_or_else(|| anyhow!("unknown feed '{}'", feed))?;
        let source = FileSource::new(FileConfig::new(settings.source.clone()))
            .with_context(|| format!("feed {}: invalid source", feed))?;
        let detector = self.detectors.create_default(feed)?;
        Ok(StreamPublisher::new(
            feed,
            Box::new(source),
            detector,
            self.stats.clone(),
        )
        .with_overlay(settings.overlay)
        .with_encoder(FrameEncoder::new(self.stream.jpeg_quality))
        .with_interval(self.stream.frame_interval())
        .with_shutdown(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::PublisherState;

    fn surveillance() -> Result<Surveillance> {
        let mut cfg = SurveildConfig::default();
        cfg.feeds = vec![
            FeedSettings::new("civilian", "stub://civ?frames=4&width=64&height=48"),
            FeedSettings::new("empty", "stub://none?frames=0"),
        ];
        Surveillance::from_config(&cfg)
    }

    #[test]
    fn unknown_default_feed_is_rejected() {
        let feeds = vec![FeedSettings::new("north", "stub://north")];
        let result = Surveillance::new(
            feeds,
            "south",
            BackendRegistry::new(),
            StreamSettings::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn builds_independent_publishers() -> Result<()> {
        let app = surveillance()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut first = app.open_publisher("civilian", shutdown.clone())?;
        let mut second = app.open_publisher("civilian", shutdown)?;
        first.open()?;
        second.open()?;
        assert!(first.next_jpeg()?.is_some());
        assert!(first.next_jpeg()?.is_some());
        assert!(second.next_jpeg()?.is_some());
        assert_eq!(first.state(), &PublisherState::Streaming);
        assert!(app.open_publisher("tanks", Arc::new(AtomicBool::new(false))).is_err());
        Ok(())
    }

    #[test]
    fn empty_source_becomes_unavailable() -> Result<()> {
        let app = surveillance()?;
        let mut publisher = app.open_publisher("empty", Arc::new(AtomicBool::new(false)))?;
        publisher.open()?;
        assert!(publisher.next_jpeg().is_err());
        Ok(())
    }
}
