//! Video-input capture pipeline: frame buffer queues and the start/stop
//! state machine of the clipper and decimator paths sharing a capture core.

pub mod capture;
pub mod device;
pub mod error;
pub mod hw;
pub mod pipeline;
pub mod source;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

use capture::{DmaWindow, PixelFormat};
use pipeline::{Delivery, PathFormat, PathSettings};

pub use error::{CaptureError, Result};

/// Probe-time configuration of one capture core and its paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub core: CoreConfig,
    pub clipper: Option<PathConfig>,
    pub decimator: Option<PathConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub module: u8,
    /// Input port the sensor is wired to
    pub channel: u8,
    /// Active size reported by the upstream source
    pub source_width: u32,
    pub source_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub format: PathFormat,
    pub fps: u32,
    #[serde(default = "default_stop_timeout_frames")]
    pub stop_timeout_frames: u32,
    #[serde(default)]
    pub delivery: Delivery,
    pub memory: DmaWindow,
}

fn default_stop_timeout_frames() -> u32 {
    2
}

impl PathConfig {
    pub fn settings(&self) -> PathSettings {
        PathSettings {
            memory: self.memory,
            fps: self.fps,
            stop_timeout_frames: self.stop_timeout_frames,
            delivery: self.delivery,
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by `VINPIPE__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("VINPIPE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                module: 0,
                channel: 0,
                source_width: 1920,
                source_height: 1080,
            },
            clipper: Some(PathConfig {
                format: PathFormat {
                    format: PixelFormat::Nv12,
                    width: 1920,
                    height: 1080,
                    buffer_count: 4,
                    crop: None,
                },
                fps: 30,
                stop_timeout_frames: default_stop_timeout_frames(),
                delivery: Delivery::Inline,
                memory: DmaWindow {
                    base: 0x4000_0000,
                    size: 16 << 20,
                },
            }),
            decimator: Some(PathConfig {
                format: PathFormat {
                    format: PixelFormat::Yuyv,
                    width: 640,
                    height: 360,
                    buffer_count: 4,
                    crop: None,
                },
                fps: 30,
                stop_timeout_frames: default_stop_timeout_frames(),
                delivery: Delivery::Deferred,
                memory: DmaWindow {
                    base: 0x4100_0000,
                    size: 4 << 20,
                },
            }),
        }
    }
}
