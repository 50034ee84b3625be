//! Register interface the pipeline programs.
//!
//! The capture core owns the aggregate enable/interrupt registers; each path
//! owns its own geometry, format and address registers. Implementations are
//! register-mapped I/O and therefore infallible and non-blocking.

pub mod sim;

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::capture::PixelFormat;
use crate::source::Rect;

/// One of the two sub-paths sharing a capture core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildId {
    Clipper,
    Decimator,
}

impl ChildId {
    pub fn mask(self) -> ChildMask {
        match self {
            ChildId::Clipper => ChildMask::CLIPPER,
            ChildId::Decimator => ChildMask::DECIMATOR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChildId::Clipper => "clipper",
            ChildId::Decimator => "decimator",
        }
    }
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Sub-paths active on a capture core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChildMask: u32 {
        const CLIPPER = 1 << 0;
        const DECIMATOR = 1 << 1;
    }
}

/// Input window and output size programmed into a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub input: Rect,
    pub output_width: u32,
    pub output_height: u32,
}

/// Aggregate registers of the capture core.
pub trait CoreRegisters: Send {
    /// Write which sub-paths are active and whether the frame interrupt is unmasked.
    fn write_enable(&mut self, paths: ChildMask, irq_enabled: bool);
    fn clear_pending(&mut self);
    fn get_pending(&self) -> bool;
}

/// Registers private to one capture path.
pub trait PathRegisters: Send {
    fn set_enable(&mut self, enable: bool);
    fn set_geometry(&mut self, geometry: &Geometry);
    fn set_format(&mut self, format: PixelFormat);
    fn set_buffer_address(&mut self, addrs: &[u64], strides: &[u32]);
}
