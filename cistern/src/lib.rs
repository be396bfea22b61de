#[cfg(feature = "cistern-base")]
pub use cistern_base as base;

#[cfg(feature = "cistern-loader")]
pub use cistern_loader as loader;
