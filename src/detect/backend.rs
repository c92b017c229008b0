use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Wraps an external detection model. Implementations may keep temporal state
/// across calls (tracking), so one instance must only ever see frames from one
/// logical stream, in decode order. Stream publishers therefore create their
/// own instance through the `BackendRegistry` instead of sharing one.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// True when the backend assigns persistent track ids itself.
    fn provides_tracking(&self) -> bool {
        false
    }

    /// Run detection on a frame.
    ///
    /// Returned boxes are in the frame's pixel coordinates. The frame is
    /// read-only; annotation happens after detection.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn provides_tracking(&self) -> bool {
        (**self).provides_tracking()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
