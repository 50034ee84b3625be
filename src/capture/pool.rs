//! Fixed set of frame buffers carved out of a physically contiguous DMA window.
//!
//! A pool is built for one format/size and one streaming configuration. It is
//! never resized: a format change throws the pool away and builds a new one
//! with a fresh session number, so buffers from the old layout can be told
//! apart from the new ones.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::info;

use super::format::FrameLayout;
use super::frame::{FrameBuffer, Plane};
use crate::error::{CaptureError, Result};
use crate::utils::{checked_align_up, page_align};

/// Double buffering needs one buffer on hardware and one waiting.
pub const MIN_BUFFERS: usize = 2;

/// Physically contiguous memory reserved for a capture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaWindow {
    pub base: u64,
    pub size: u64,
}

#[derive(Debug)]
pub struct FramePool {
    layout: FrameLayout,
    count: usize,
    session: u64,
    buffer_size: u64,
}

impl FramePool {
    /// Describe `count` buffers of `layout` inside `window` and create them.
    pub fn allocate(
        window: DmaWindow,
        layout: FrameLayout,
        count: usize,
        session: u64,
    ) -> Result<(Self, Vec<FrameBuffer>)> {
        if count < MIN_BUFFERS {
            return Err(CaptureError::TooFewBuffers {
                requested: count,
                minimum: MIN_BUFFERS,
            });
        }

        let page = page_align();
        let buffer_size = checked_align_up(layout.frame_size(), page).ok_or_else(|| {
            CaptureError::InvalidGeometry(format!(
                "{} byte frame cannot be page aligned",
                layout.frame_size()
            ))
        })?;
        let too_small = |available| CaptureError::PoolTooSmall {
            available,
            needed: buffer_size,
            count,
        };

        // Windows reaching past the end of the address space are unusable
        let base = checked_align_up(window.base, page).ok_or(too_small(0))?;
        let usable = window.size.saturating_sub(base - window.base);
        let needed = buffer_size
            .checked_mul(count as u64)
            .filter(|&needed| needed <= usable)
            .ok_or(too_small(usable))?;
        if base.checked_add(needed).is_none() {
            return Err(too_small(0));
        }

        let buffers = (0..count)
            .map(|index| {
                let start = base + buffer_size * index as u64;
                let planes: SmallVec<[Plane; 3]> = layout
                    .planes
                    .iter()
                    .map(|p| Plane {
                        addr: start + p.offset,
                        stride: p.stride,
                        len: p.size,
                    })
                    .collect();
                FrameBuffer::new(index, session, planes)
            })
            .collect();

        info!(
            count,
            buffer_size,
            base,
            format = ?layout.format,
            width = layout.width,
            height = layout.height,
            "Allocated frame pool"
        );

        Ok((
            Self {
                layout,
                count,
                session,
                buffer_size,
            },
            buffers,
        ))
    }

    /// Whether `buf` was created by this pool.
    pub fn owns(&self, buf: &FrameBuffer) -> bool {
        buf.session() == self.session && buf.index() < self.count
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }
}
