use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use super::backend::DetectorBackend;
use super::backends::SyntheticBackend;
use super::tracker::TrackingDetector;
use crate::config::DetectorSettings;

/// Builds a fresh backend instance for the named feed.
pub type BackendFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Thread-safe registry of detector backend factories.
///
/// The registry hands out new instances rather than shared ones: tracking
/// backends carry per-stream state, and interleaving frames from different
/// viewers through one instance would corrupt their track ids.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
    tracking: bool,
    max_missing: u32,
    track_iou: f32,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
            tracking: false,
            max_missing: 30,
            track_iou: 0.3,
        }
    }

    /// Registry with the built-in backends, defaulting to `settings.backend`.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register("synthetic", |feed| {
            Ok(Box::new(SyntheticBackend::for_feed(feed)) as Box<dyn DetectorBackend>)
        });
        #[cfg(feature = "backend-tract")]
        {
            let settings = settings.clone();
            registry.register("tract", move |_feed| {
                let model_path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
                let backend = super::backends::TractBackend::new(model_path, settings.input_size)?
                    .with_thresholds(settings.confidence, settings.iou);
                Ok(Box::new(backend) as Box<dyn DetectorBackend>)
            });
        }
        registry.set_default(&settings.backend)?;
        registry.tracking = settings.tracking;
        registry.max_missing = settings.max_missing;
        registry.track_iou = settings.track_iou;
        Ok(registry)
    }

    /// Register a factory. The first registered factory becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!(
                "detector backend '{}' not available (have: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Wrap backends without their own tracking in an IoU tracker.
    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    /// Overlap a detection needs to keep an existing track id.
    pub fn track_iou(&self) -> f32 {
        self.track_iou
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Create a backend instance by name for one feed's stream.
    pub fn create(&self, name: &str, feed: &str) -> Result<Box<dyn DetectorBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        let mut backend = factory(feed)
            .with_context(|| format!("create detector backend '{}' for feed {}", name, feed))?;
        backend.warm_up()?;
        if self.tracking && !backend.provides_tracking() {
            return Ok(Box::new(
                TrackingDetector::new(backend)
                    .with_limits(self.track_iou, self.max_missing),
            ));
        }
        Ok(backend)
    }

    /// Create an instance of the default backend.
    pub fn create_default(&self, feed: &str) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.create(name, feed)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
