pub mod core;
pub mod registry;

pub use self::core::{CaptureCore, InterruptHandler, IrqReturn, MAX_CHILDREN};
pub use registry::CoreRegistry;
