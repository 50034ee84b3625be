use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

/// One hardware-visible plane of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    /// Physical base address
    pub addr: u64,
    pub stride: u32,
    pub len: u64,
}

/// How a buffer came back to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Hardware finished writing a frame into it.
    Done,
    /// Streaming stopped before the buffer was filled.
    Aborted,
}

/// Hardware-addressable capture target.
///
/// Deliberately neither `Clone` nor `Copy`: a buffer lives in exactly one
/// place at a time (empty queue, in-flight slot, done queue or consumer)
/// and moves between them by value.
pub struct FrameBuffer {
    index: usize,
    session: u64,
    planes: SmallVec<[Plane; 3]>,

    /// Number of downstream stages that have finished with this buffer
    progress: u32,

    /// Completion metadata, valid once delivered with `BufferStatus::Done`
    sequence: u64,
    timestamp: Option<Instant>,

    /// Context attached by the consumer (e.g. its own buffer object)
    owner: Option<Arc<dyn Any + Send + Sync>>,
}

impl FrameBuffer {
    pub(crate) fn new(index: usize, session: u64, planes: SmallVec<[Plane; 3]>) -> Self {
        Self {
            index,
            session,
            planes,
            progress: 0,
            sequence: 0,
            timestamp: None,
            owner: None,
        }
    }

    /// Position of the buffer within its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn addresses(&self) -> SmallVec<[u64; 3]> {
        self.planes.iter().map(|p| p.addr).collect()
    }

    pub fn strides(&self) -> SmallVec<[u32; 3]> {
        self.planes.iter().map(|p| p.stride).collect()
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Record that one more downstream stage is done; returns the new count.
    pub fn advance_progress(&mut self) -> u32 {
        self.progress += 1;
        self.progress
    }

    /// Frame sequence number assigned when the hardware completed it.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    pub fn set_owner(&mut self, owner: Arc<dyn Any + Send + Sync>) {
        self.owner = Some(owner);
    }

    pub fn owner(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.owner.as_ref()
    }

    /// Downcast the attached owner context.
    pub fn owner_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.owner.as_deref().and_then(|o| o.downcast_ref::<T>())
    }

    pub(crate) fn mark_completed(&mut self, sequence: u64) {
        self.sequence = sequence;
        self.timestamp = Some(Instant::now());
    }

    pub(crate) fn recycle(&mut self) {
        self.progress = 0;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("index", &self.index)
            .field("session", &self.session)
            .field("planes", &self.planes)
            .field("progress", &self.progress)
            .field("sequence", &self.sequence)
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}
