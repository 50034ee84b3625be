//! Simulated register backend.
//!
//! Records every register write so tests and the demo binary can observe
//! what the pipeline programmed, and lets callers raise the frame-complete
//! interrupt by hand.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChildMask, CoreRegisters, Geometry, PathRegisters};
use crate::capture::PixelFormat;

#[derive(Debug, Clone, Default)]
pub struct CoreSnapshot {
    pub paths: ChildMask,
    pub irq_enabled: bool,
    pub pending: bool,
    pub enable_writes: usize,
    pub pending_clears: usize,
}

/// Simulated capture core registers. Clones share the same register file.
#[derive(Debug, Clone, Default)]
pub struct SimCore {
    regs: Arc<Mutex<CoreSnapshot>>,
}

impl SimCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a frame-complete event. Returns false if the interrupt is masked.
    pub fn raise(&self) -> bool {
        let mut regs = self.regs.lock();
        if !regs.irq_enabled {
            return false;
        }
        regs.pending = true;
        true
    }

    /// Latch the pending bit even if masked, as a stuck line would.
    pub fn raise_spurious(&self) {
        self.regs.lock().pending = true;
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        self.regs.lock().clone()
    }
}

impl CoreRegisters for SimCore {
    fn write_enable(&mut self, paths: ChildMask, irq_enabled: bool) {
        let mut regs = self.regs.lock();
        regs.paths = paths;
        regs.irq_enabled = irq_enabled;
        regs.enable_writes += 1;
    }

    fn clear_pending(&mut self) {
        let mut regs = self.regs.lock();
        regs.pending = false;
        regs.pending_clears += 1;
    }

    fn get_pending(&self) -> bool {
        self.regs.lock().pending
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathSnapshot {
    pub enabled: bool,
    pub geometry: Option<Geometry>,
    pub format: Option<PixelFormat>,
    /// Luma/packed plane address of every `set_buffer_address` call, oldest first.
    pub address_writes: Vec<u64>,
    pub strides: Vec<u32>,
}

impl PathSnapshot {
    pub fn current_address(&self) -> Option<u64> {
        self.address_writes.last().copied()
    }
}

/// Simulated per-path registers. Clones share the same register file.
#[derive(Debug, Clone, Default)]
pub struct SimPath {
    regs: Arc<Mutex<PathSnapshot>>,
}

impl SimPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PathSnapshot {
        self.regs.lock().clone()
    }
}

impl PathRegisters for SimPath {
    fn set_enable(&mut self, enable: bool) {
        self.regs.lock().enabled = enable;
    }

    fn set_geometry(&mut self, geometry: &Geometry) {
        self.regs.lock().geometry = Some(*geometry);
    }

    fn set_format(&mut self, format: PixelFormat) {
        self.regs.lock().format = Some(format);
    }

    fn set_buffer_address(&mut self, addrs: &[u64], strides: &[u32]) {
        let mut regs = self.regs.lock();
        if let Some(&first) = addrs.first() {
            regs.address_writes.push(first);
        }
        regs.strides = strides.to_vec();
    }
}
