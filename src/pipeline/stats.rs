//! Per-path counters, mirrored to the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::hw::ChildId;
use crate::pipeline::state::StopOutcome;

#[derive(Default)]
struct Counters {
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    underruns: AtomicU64,
    buffers_aborted: AtomicU64,
    clean_stops: AtomicU64,
    immediate_stops: AtomicU64,
    forced_stops: AtomicU64,
}

/// Statistics for one capture path
pub struct PathStats {
    path: &'static str,
    counters: CachePadded<Counters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub underruns: u64,
    pub buffers_aborted: u64,
    pub clean_stops: u64,
    /// Stops taken while no buffer was on hardware
    pub immediate_stops: u64,
    pub forced_stops: u64,
}

impl PathStats {
    pub fn new(child: ChildId) -> Self {
        Self {
            path: child.name(),
            counters: CachePadded::new(Counters::default()),
        }
    }

    pub fn delivered(&self) {
        self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vinpipe_frames_delivered", "path" => self.path).increment(1);
    }

    /// Frame completed with no buffer on hardware to receive it.
    pub fn dropped(&self) {
        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vinpipe_frames_dropped", "path" => self.path).increment(1);
    }

    pub fn underrun(&self) {
        self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vinpipe_underruns", "path" => self.path).increment(1);
    }

    pub fn aborted(&self, count: u64) {
        self.counters
            .buffers_aborted
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn stopped(&self, outcome: StopOutcome) {
        let kind = match outcome {
            StopOutcome::Clean => {
                self.counters.clean_stops.fetch_add(1, Ordering::Relaxed);
                "clean"
            }
            StopOutcome::NothingInFlight => {
                self.counters.immediate_stops.fetch_add(1, Ordering::Relaxed);
                "immediate"
            }
            StopOutcome::Forced => {
                self.counters.forced_stops.fetch_add(1, Ordering::Relaxed);
                "forced"
            }
            StopOutcome::AlreadyIdle => return,
        };
        metrics::counter!("vinpipe_stops", "path" => self.path, "kind" => kind).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            frames_delivered: c.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            underruns: c.underruns.load(Ordering::Relaxed),
            buffers_aborted: c.buffers_aborted.load(Ordering::Relaxed),
            clean_stops: c.clean_stops.load(Ordering::Relaxed),
            immediate_stops: c.immediate_stops.load(Ordering::Relaxed),
            forced_stops: c.forced_stops.load(Ordering::Relaxed),
        }
    }
}
