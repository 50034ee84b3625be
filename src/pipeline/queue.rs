//! Lock-protected FIFO handing frame buffer ownership between pipeline roles

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::capture::FrameBuffer;

/// FIFO of owned frame buffers.
///
/// Critical sections cover only the list operation and the counter update,
/// so both interrupt dispatch and control paths can use it without stalling.
#[derive(Debug, Default)]
pub struct BufferQueue {
    list: Mutex<VecDeque<FrameBuffer>>,
    count: AtomicUsize,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the list for a pool of `capacity` buffers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Mutex::new(VecDeque::with_capacity(capacity)),
            count: AtomicUsize::new(0),
        }
    }

    /// Append to the tail.
    pub fn enqueue(&self, buf: FrameBuffer) {
        let mut list = self.list.lock();
        list.push_back(buf);
        self.count.store(list.len(), Ordering::Release);
    }

    /// Remove the head. `None` is an underrun for the caller to absorb.
    pub fn dequeue(&self) -> Option<FrameBuffer> {
        let mut list = self.list.lock();
        let buf = list.pop_front();
        self.count.store(list.len(), Ordering::Release);
        buf
    }

    /// Inspect the entry `pos` places behind the head without removing it.
    pub fn peek<R>(&self, pos: usize, f: impl FnOnce(&FrameBuffer) -> R) -> Option<R> {
        self.list.lock().get(pos).map(f)
    }

    /// Drain the queue, passing every buffer to `f` in FIFO order.
    ///
    /// `f` runs outside the lock. Returns the number of buffers drained.
    pub fn clear(&self, mut f: impl FnMut(FrameBuffer)) -> usize {
        let mut drained = 0;
        while let Some(buf) = self.dequeue() {
            f(buf);
            drained += 1;
        }
        drained
    }

    /// Advisory count; may be stale by the time the caller looks at it.
    pub fn size(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
