pub mod format;
pub mod frame;
pub mod pool;

pub use format::{FrameLayout, PixelFormat, PlaneLayout};
pub use frame::{BufferStatus, FrameBuffer, Plane};
pub use pool::{DmaWindow, FramePool, MIN_BUFFERS};
