//! Start/stop state machine of a capture path.
//!
//! ```text
//!   Idle ──start──> Running ──stop──> Stopping
//!    ▲ ▲                 │                 │
//!    │ └─ stop, nothing ─┘                 │
//!    │    in flight                        │
//!    └────── final interrupt / timeout ────┘
//! ```

/// Streaming state of a capture path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    /// Stop requested; waiting for the last frame interrupt.
    Stopping,
}

impl PipelineState {
    /// State after a successful start, or `None` if starting is not allowed.
    pub fn start(self) -> Option<Self> {
        match self {
            PipelineState::Idle => Some(PipelineState::Running),
            _ => None,
        }
    }

    /// State after a stop request, or `None` if there is nothing to stop.
    pub fn request_stop(self) -> Option<Self> {
        match self {
            PipelineState::Running => Some(PipelineState::Stopping),
            _ => None,
        }
    }

    /// State after stopping with no buffer on hardware: no interrupt to wait for.
    pub fn halt(self) -> Option<Self> {
        match self {
            PipelineState::Running => Some(PipelineState::Idle),
            _ => None,
        }
    }

    /// State once the final interrupt arrived or the wait timed out.
    pub fn finish_stop(self) -> Option<Self> {
        match self {
            PipelineState::Stopping => Some(PipelineState::Idle),
            _ => None,
        }
    }

    pub fn is_streaming(self) -> bool {
        self != PipelineState::Idle
    }
}

/// How a `stop()` call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The path was not streaming; nothing happened.
    AlreadyIdle,
    /// The final frame interrupt acknowledged the stop.
    Clean,
    /// No buffer was on hardware, so the path was disabled without waiting.
    NothingInFlight,
    /// No interrupt arrived in time; hardware was disabled regardless.
    Forced,
}
