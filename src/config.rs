use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::OverlayKind;
use crate::stats::CountingMode;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_STREAMS: usize = 16;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_DETECTOR: &str = "synthetic";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_MISSING: u32 = 30;
const DEFAULT_TRACK_IOU: f32 = 0.3;
const DEFAULT_FEED: &str = "civilian";
const MAX_TARGET_FPS: u32 = 120;
const FEED_NAME_PATTERN: &str = "^[a-z][a-z0-9_-]{0,31}$";

#[derive(Debug, Deserialize, Default)]
struct SurveildConfigFile {
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    feeds: Option<Vec<FeedConfigFile>>,
    default_feed: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_streams: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    target_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    input_size: Option<u32>,
    tracking: Option<bool>,
    track_iou: Option<f32>,
    max_missing: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FeedConfigFile {
    name: String,
    source: String,
    overlay: Option<OverlayKind>,
    counting: Option<CountingMode>,
}

#[derive(Debug, Clone)]
pub struct SurveildConfig {
    pub api: ApiSettings,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub feeds: Vec<FeedSettings>,
    pub default_feed: String,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    /// Concurrent video viewers across all feeds.
    pub max_streams: usize,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub target_fps: u32,
    pub jpeg_quality: u8,
}

impl StreamSettings {
    pub fn frame_interval(&self) -> Duration {
        crate::stream::frame_interval(self.target_fps)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub iou: f32,
    pub input_size: u32,
    /// Wrap backends without their own tracking in an IoU tracker.
    pub tracking: bool,
    /// Minimum overlap for a detection to continue an existing track.
    pub track_iou: f32,
    pub max_missing: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            input_size: DEFAULT_INPUT_SIZE,
            tracking: true,
            track_iou: DEFAULT_TRACK_IOU,
            max_missing: DEFAULT_MAX_MISSING,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub name: String,
    /// Local path, image directory, or `stub://` URI.
    pub source: String,
    pub overlay: OverlayKind,
    pub counting: CountingMode,
}

impl FeedSettings {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            overlay: OverlayKind::default(),
            counting: CountingMode::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayKind) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_counting(mut self, counting: CountingMode) -> Self {
        self.counting = counting;
        self
    }
}

fn default_feeds() -> Vec<FeedSettings> {
    vec![
        FeedSettings::new("civilian", "stub://drone_civilian").with_overlay(OverlayKind::Civilian),
        FeedSettings::new("soldier", "stub://drone_soldier").with_overlay(OverlayKind::Soldier),
    ]
}

impl Default for SurveildConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings {
                addr: DEFAULT_API_ADDR.to_string(),
                max_streams: DEFAULT_MAX_STREAMS,
            },
            stream: StreamSettings::default(),
            detector: DetectorSettings::default(),
            feeds: default_feeds(),
            default_feed: DEFAULT_FEED.to_string(),
        }
    }
}

impl SurveildConfig {
    /// Defaults, then the file named by `SURVEIL_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SURVEIL_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SurveildConfigFile) -> Self {
        let defaults = Self::default();
        let api = ApiSettings {
            addr: file
                .api
                .as_ref()
                .and_then(|api| api.addr.clone())
                .unwrap_or(defaults.api.addr),
            max_streams: file
                .api
                .as_ref()
                .and_then(|api| api.max_streams)
                .unwrap_or(defaults.api.max_streams),
        };
        let stream = StreamSettings {
            target_fps: file
                .stream
                .as_ref()
                .and_then(|stream| stream.target_fps)
                .unwrap_or(defaults.stream.target_fps),
            jpeg_quality: file
                .stream
                .as_ref()
                .and_then(|stream| stream.jpeg_quality)
                .unwrap_or(defaults.stream.jpeg_quality),
        };
        let detector = match file.detector {
            Some(det) => DetectorSettings {
                backend: det.backend.unwrap_or(defaults.detector.backend),
                model_path: det.model_path,
                confidence: det.confidence.unwrap_or(defaults.detector.confidence),
                iou: det.iou.unwrap_or(defaults.detector.iou),
                input_size: det.input_size.unwrap_or(defaults.detector.input_size),
                tracking: det.tracking.unwrap_or(defaults.detector.tracking),
                track_iou: det.track_iou.unwrap_or(defaults.detector.track_iou),
                max_missing: det.max_missing.unwrap_or(defaults.detector.max_missing),
            },
            None => defaults.detector,
        };
        let feeds = match file.feeds {
            Some(feeds) => feeds
                .into_iter()
                .map(|feed| FeedSettings {
                    name: feed.name,
                    source: feed.source,
                    overlay: feed.overlay.unwrap_or_default(),
                    counting: feed.counting.unwrap_or_default(),
                })
                .collect(),
            None => defaults.feeds,
        };
        let default_feed = file
            .default_feed
            .or_else(|| {
                let has_default = feeds.iter().any(|feed| feed.name == DEFAULT_FEED);
                if has_default {
                    None
                } else {
                    feeds.first().map(|feed| feed.name.clone())
                }
            })
            .unwrap_or(defaults.default_feed);
        Self {
            api,
            stream,
            detector,
            feeds,
            default_feed,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SURVEIL_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr;
            }
        }
        if let Ok(sources) = std::env::var("SURVEIL_FEED_SOURCES") {
            for entry in split_csv(&sources) {
                let (name, source) = entry.split_once('=').ok_or_else(|| {
                    anyhow!("SURVEIL_FEED_SOURCES entries must be feed=source, got '{}'", entry)
                })?;
                let name = name.trim();
                let feed = self
                    .feeds
                    .iter_mut()
                    .find(|feed| feed.name == name)
                    .ok_or_else(|| anyhow!("SURVEIL_FEED_SOURCES names unknown feed '{}'", name))?;
                feed.source = source.trim().to_string();
            }
        }
        if let Ok(mode) = std::env::var("SURVEIL_COUNTING_MODE") {
            if !mode.trim().is_empty() {
                let mode: CountingMode = mode.parse()?;
                for feed in &mut self.feeds {
                    feed.counting = mode;
                }
            }
        }
        if let Ok(backend) = std::env::var("SURVEIL_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("SURVEIL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(fps) = std::env::var("SURVEIL_TARGET_FPS") {
            self.stream.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("SURVEIL_TARGET_FPS must be an integer frame rate"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(anyhow!("at least one feed must be configured"));
        }
        let pattern = Regex::new(FEED_NAME_PATTERN)?;
        let mut names = HashSet::new();
        for feed in &self.feeds {
            if !pattern.is_match(&feed.name) {
                return Err(anyhow!(
                    "feed name '{}' must match {}",
                    feed.name,
                    FEED_NAME_PATTERN
                ));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(anyhow!("feed '{}' is configured more than once", feed.name));
            }
            if feed.source.trim().is_empty() {
                return Err(anyhow!("feed '{}' has an empty source", feed.name));
            }
        }
        if !names.contains(self.default_feed.as_str()) {
            return Err(anyhow!(
                "default feed '{}' is not a configured feed",
                self.default_feed
            ));
        }
        if self.stream.target_fps == 0 || self.stream.target_fps > MAX_TARGET_FPS {
            return Err(anyhow!(
                "stream.target_fps must be between 1 and {}",
                MAX_TARGET_FPS
            ));
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err(anyhow!("stream.jpeg_quality must be between 1 and 100"));
        }
        if self.api.max_streams == 0 {
            return Err(anyhow!("api.max_streams must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("detector.confidence must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou) {
            return Err(anyhow!("detector.iou must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.detector.track_iou) {
            return Err(anyhow!("detector.track_iou must be within 0..=1"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.to_lowercase();
        Ok(())
    }

    pub fn feed(&self, name: &str) -> Option<&FeedSettings> {
        self.feeds.iter().find(|feed| feed.name == name)
    }
}

fn read_config_file(path: &Path) -> Result<SurveildConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
