//! Shared foundation for Stereopass: configuration, frame model,
//! pose telemetry, metrics and error types.
//!
//! Everything in this crate is pure host-side logic; the GPU and
//! compositor plumbing lives in `stereopass-xr`.

#![forbid(unsafe_code)]

pub mod config;
pub mod frame;
pub mod stats;
pub mod telemetry;

pub use config::PipelineConfig;
pub use frame::{EyeImage, StereoFrame};

use thiserror::Error;

/// Result type alias using Stereopass's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the passthrough pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Camera device open or read failure.
    #[error("camera error: {0}")]
    Camera(String),

    /// OpenXR instance, session or swapchain failure.
    #[error("compositor error: {0}")]
    Compositor(String),

    /// Vulkan resource or submission failure.
    #[error("gpu error: {0}")]
    Gpu(String),

    /// Invalid pipeline configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a camera error from any displayable type.
    pub fn camera(msg: impl std::fmt::Display) -> Self {
        Self::Camera(msg.to_string())
    }

    /// Create a compositor error from any displayable type.
    pub fn compositor(msg: impl std::fmt::Display) -> Self {
        Self::Compositor(msg.to_string())
    }

    /// Create a GPU error from any displayable type.
    pub fn gpu(msg: impl std::fmt::Display) -> Self {
        Self::Gpu(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
