use std::time::Duration;

/// Byte alignment of every plane stride and plane base address.
pub const STRIDE_ALIGN: u64 = 16;

/// Round `value` up to the next multiple of `align` (a power of two).
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] that reports overflow instead of wrapping.
pub const fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Host page size, used to align whole frame buffers.
pub fn page_align() -> u64 {
    page_size::get() as u64
}

/// Duration of one frame at `fps` frames per second.
pub fn frame_period(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
}
