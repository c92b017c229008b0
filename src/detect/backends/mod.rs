pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use synthetic::SyntheticBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
