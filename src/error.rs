//! Error types for the capture pipeline

use thiserror::Error;

use crate::hw::ChildId;

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Failures surfaced synchronously to control-path callers.
///
/// Underruns and stop timeouts are not errors: they are absorbed by the
/// pipeline and only show up in logs and statistics.
#[derive(Debug, Error)]
pub enum CaptureError {
    // Configuration
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported pixel format {format:?} on {child}")]
    UnsupportedFormat {
        child: ChildId,
        format: crate::capture::PixelFormat,
    },

    #[error("{0} has no buffers configured")]
    NoBuffers(ChildId),

    #[error("{0} has no consumer registered")]
    NoConsumer(ChildId),

    #[error("DMA window of {available} bytes cannot hold {count} buffers of {needed} bytes")]
    PoolTooSmall {
        available: u64,
        needed: u64,
        count: usize,
    },

    #[error("{requested} buffers requested, at least {minimum} required")]
    TooFewBuffers { requested: usize, minimum: usize },

    #[error("buffer {0} does not belong to the active pool")]
    ForeignBuffer(usize),

    // Busy / topology
    #[error("{0} is already streaming")]
    AlreadyRunning(ChildId),

    #[error("{0} cannot be reconfigured while streaming")]
    Busy(ChildId),

    #[error("interrupt registry full, cannot register {0}")]
    RegistryFull(ChildId),

    #[error("{0} is already registered on this capture core")]
    AlreadyRegistered(ChildId),

    #[error("{0} is not registered on this capture core")]
    NotRegistered(ChildId),

    #[error("no capture core with module index {0}")]
    UnknownModule(u8),

    // Hardware setup
    #[error("upstream source failed: {0}")]
    Source(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
