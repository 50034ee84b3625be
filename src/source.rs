//! Upstream video source contract (sensor / bridge sub-device).

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.left as u64 + other.width as u64 <= self.left as u64 + self.width as u64
            && other.top as u64 + other.height as u64 <= self.top as u64 + self.height as u64
    }
}

/// Source of frames feeding a capture path.
pub trait VideoSource: Send + Sync {
    /// Start or stop frame production.
    fn set_stream(&self, on: bool) -> Result<(), String>;

    /// Active output window of the source.
    fn get_crop(&self) -> Rect;
}

/// Fixed-geometry source that always accepts stream requests.
#[derive(Debug)]
pub struct StaticSource {
    crop: Rect,
    streaming: AtomicBool,
}

impl StaticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            crop: Rect::new(0, 0, width, height),
            streaming: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

impl VideoSource for StaticSource {
    fn set_stream(&self, on: bool) -> Result<(), String> {
        self.streaming.store(on, Ordering::Release);
        Ok(())
    }

    fn get_crop(&self) -> Rect {
        self.crop
    }
}
