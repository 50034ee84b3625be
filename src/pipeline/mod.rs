pub mod consumer;
pub mod frontend;
pub mod queue;
pub mod state;
pub mod stats;

pub use consumer::{Delivery, FrameConsumer};
pub use frontend::{FrontEnd, PathFormat, PathSettings};
pub use queue::BufferQueue;
pub use state::{PipelineState, StopOutcome};
pub use stats::StatsSnapshot;
