//! Pixel formats and per-plane memory layout.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{CaptureError, Result};
use crate::hw::ChildId;
use crate::utils::{align_up, checked_align_up, STRIDE_ALIGN};

/// Pixel formats the capture paths can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Rgb565,
    Yuyv,
    Nv12,
    Nv21,
    /// Three-plane 4:2:0
    Yuv420,
    /// Three-plane 4:2:2
    Yuv422p,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Rgb565 | PixelFormat::Yuyv => 1,
            PixelFormat::Nv12 | PixelFormat::Nv21 => 2,
            PixelFormat::Yuv420 | PixelFormat::Yuv422p => 3,
        }
    }

    /// Whether the decimator's write-back unit can emit this format.
    /// The clipper writes every format.
    pub fn supported_by(self, child: ChildId) -> bool {
        match child {
            ChildId::Clipper => true,
            ChildId::Decimator => !matches!(self, PixelFormat::Rgb24 | PixelFormat::Yuv422p),
        }
    }

    fn needs_even_width(self) -> bool {
        !matches!(self, PixelFormat::Rgb24 | PixelFormat::Rgb565)
    }

    fn needs_even_height(self) -> bool {
        matches!(
            self,
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yuv420
        )
    }

    /// (bytes per line, lines) of each plane before alignment.
    fn plane_dims(self, width: u32, height: u32) -> SmallVec<[(u64, u64); 3]> {
        let (w, h) = (u64::from(width), u64::from(height));
        let mut dims = SmallVec::new();
        match self {
            PixelFormat::Rgb24 => dims.push((w * 3, h)),
            PixelFormat::Rgb565 | PixelFormat::Yuyv => dims.push((w * 2, h)),
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                dims.push((w, h));
                dims.push((w, h / 2));
            }
            PixelFormat::Yuv420 => {
                dims.push((w, h));
                dims.push((w / 2, h / 2));
                dims.push((w / 2, h / 2));
            }
            PixelFormat::Yuv422p => {
                dims.push((w, h));
                dims.push((w / 2, h));
                dims.push((w / 2, h));
            }
        }
        dims
    }

    /// Compute the memory layout of one `width` x `height` frame.
    pub fn layout(self, width: u32, height: u32) -> Result<FrameLayout> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidGeometry(format!(
                "{}x{} frame",
                width, height
            )));
        }
        if (self.needs_even_width() && width % 2 != 0)
            || (self.needs_even_height() && height % 2 != 0)
        {
            return Err(CaptureError::InvalidGeometry(format!(
                "{}x{} not representable in {:?}",
                width, height, self
            )));
        }

        let too_large = || {
            CaptureError::InvalidGeometry(format!(
                "{}x{} {:?} frame exceeds the address space",
                width, height, self
            ))
        };
        let mut planes = SmallVec::new();
        let mut offset: u64 = 0;
        for (bytes_per_line, lines) in self.plane_dims(width, height) {
            let stride = align_up(bytes_per_line, STRIDE_ALIGN);
            let size = stride
                .checked_mul(lines)
                .and_then(|bytes| checked_align_up(bytes, STRIDE_ALIGN))
                .ok_or_else(too_large)?;
            let stride = u32::try_from(stride).map_err(|_| {
                CaptureError::InvalidGeometry(format!(
                    "{} byte line stride does not fit the stride register",
                    stride
                ))
            })?;
            planes.push(PlaneLayout {
                offset,
                stride,
                size,
            });
            offset = offset.checked_add(size).ok_or_else(too_large)?;
        }

        Ok(FrameLayout {
            format: self,
            width,
            height,
            planes,
        })
    }
}

/// Placement of one plane inside a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Offset from the buffer base address
    pub offset: u64,
    pub stride: u32,
    pub size: u64,
}

/// Memory layout of a frame in a given format and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: SmallVec<[PlaneLayout; 3]>,
}

impl FrameLayout {
    /// Bytes occupied by all planes.
    pub fn frame_size(&self) -> u64 {
        self.planes.iter().map(|p| p.size).sum()
    }
}
