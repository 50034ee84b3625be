//! Capture core: owner of the shared interrupt line and the aggregate
//! per-path enable register.
//!
//! Lock order: the core lock is taken first and a path's own lock second
//! (interrupt dispatch). Paths never call into the core while holding
//! their own lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{CaptureError, Result};
use crate::hw::{ChildId, ChildMask, CoreRegisters};

/// Number of sub-paths that can share one capture core interrupt.
pub const MAX_CHILDREN: usize = 2;

/// Per-path frame-complete callback.
///
/// Runs from interrupt dispatch with the core lock held: it must not block
/// and must not call back into the [`CaptureCore`].
pub trait InterruptHandler: Send + Sync {
    fn child(&self) -> ChildId;
    fn on_frame_done(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Nothing was pending
    None,
    Handled,
}

/// Fixed-capacity list of handlers kept in registration order.
struct HandlerTable {
    slots: [Option<Arc<dyn InterruptHandler>>; MAX_CHILDREN],
    len: usize,
}

impl HandlerTable {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            len: 0,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn InterruptHandler>> {
        self.slots[..self.len].iter().flatten()
    }

    fn contains(&self, child: ChildId) -> bool {
        self.iter().any(|h| h.child() == child)
    }

    fn push(&mut self, handler: Arc<dyn InterruptHandler>) -> Result<()> {
        let child = handler.child();
        if self.contains(child) {
            return Err(CaptureError::AlreadyRegistered(child));
        }
        if self.len == MAX_CHILDREN {
            return Err(CaptureError::RegistryFull(child));
        }
        self.slots[self.len] = Some(handler);
        self.len += 1;
        Ok(())
    }

    fn remove(&mut self, child: ChildId) -> Result<Arc<dyn InterruptHandler>> {
        let pos = self.slots[..self.len]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|h| h.child() == child))
            .ok_or(CaptureError::NotRegistered(child))?;
        let removed = self.slots[pos].take();
        // Keep the survivors contiguous so dispatch order stays registration order
        self.slots[pos..self.len].rotate_left(1);
        self.len -= 1;
        removed.ok_or(CaptureError::NotRegistered(child))
    }
}

struct CoreInner {
    regs: Box<dyn CoreRegisters>,
    running: ChildMask,
    handlers: HandlerTable,
}

/// One capture core instance, shared by its clipper and decimator.
pub struct CaptureCore {
    module: u8,
    inner: Mutex<CoreInner>,
}

impl CaptureCore {
    pub fn new(module: u8, regs: Box<dyn CoreRegisters>) -> Self {
        Self {
            module,
            inner: Mutex::new(CoreInner {
                regs,
                running: ChildMask::empty(),
                handlers: HandlerTable::new(),
            }),
        }
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    /// Add a path's interrupt handler. At most [`MAX_CHILDREN`] may be registered.
    pub fn register_child(&self, handler: Arc<dyn InterruptHandler>) -> Result<()> {
        let child = handler.child();
        let mut inner = self.inner.lock();
        inner.handlers.push(handler).map_err(|e| {
            error!(module = self.module, %child, "Interrupt registration rejected: {}", e);
            e
        })?;
        debug!(module = self.module, %child, "Registered interrupt handler");
        Ok(())
    }

    pub fn unregister_child(&self, child: ChildId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handlers.remove(child)?;
        debug!(module = self.module, %child, "Unregistered interrupt handler");
        Ok(())
    }

    /// Mark `child` active. Returns whether the hardware enable state changed.
    pub fn run(&self, child: ChildId) -> bool {
        self.update(|running| running | child.mask())
    }

    /// Mark `child` inactive. Returns whether the hardware enable state changed.
    pub fn stop(&self, child: ChildId) -> bool {
        self.update(|running| running - child.mask())
    }

    fn update(&self, f: impl FnOnce(ChildMask) -> ChildMask) -> bool {
        let mut inner = self.inner.lock();
        let next = f(inner.running);
        if next == inner.running {
            return false;
        }
        inner.running = next;
        inner.regs.write_enable(next, !next.is_empty());
        debug!(module = self.module, running = ?next, "Capture core enable updated");
        true
    }

    pub fn running(&self) -> ChildMask {
        self.inner.lock().running
    }

    pub fn registered(&self) -> usize {
        self.inner.lock().handlers.len
    }

    /// Service the shared interrupt line.
    ///
    /// Clears the pending condition, then runs every registered handler in
    /// registration order with the core lock held.
    pub fn handle_interrupt(&self) -> IrqReturn {
        let mut inner = self.inner.lock();
        if !inner.regs.get_pending() {
            return IrqReturn::None;
        }
        inner.regs.clear_pending();
        trace!(module = self.module, "Frame interrupt");

        for handler in inner.handlers.iter() {
            handler.on_frame_done();
        }
        IrqReturn::Handled
    }
}
