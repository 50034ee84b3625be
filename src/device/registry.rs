//! Capture cores indexed by module number, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::core::CaptureCore;
use crate::error::{CaptureError, Result};
use crate::hw::CoreRegisters;

#[derive(Default)]
pub struct CoreRegistry {
    cores: BTreeMap<u8, Arc<CaptureCore>>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the core for `module`, or return the existing one.
    pub fn insert(&mut self, module: u8, regs: Box<dyn CoreRegisters>) -> Arc<CaptureCore> {
        self.cores
            .entry(module)
            .or_insert_with(|| {
                info!(module, "Capture core created");
                Arc::new(CaptureCore::new(module, regs))
            })
            .clone()
    }

    pub fn get(&self, module: u8) -> Result<Arc<CaptureCore>> {
        self.cores
            .get(&module)
            .cloned()
            .ok_or(CaptureError::UnknownModule(module))
    }

    pub fn modules(&self) -> impl Iterator<Item = u8> + '_ {
        self.cores.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }
}
