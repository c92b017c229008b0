mod backend;
mod backends;
mod registry;
mod result;
mod tracker;

pub use backend::DetectorBackend;
pub use backends::SyntheticBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{BoundingBox, Detection};
pub use tracker::{IouTracker, TrackingDetector};
