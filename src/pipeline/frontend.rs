//! Capture front-end (clipper or decimator): queue owner and start/stop
//! state machine sitting on a shared capture core.
//!
//! Buffers circulate between four owners: the empty queue, the single
//! in-flight slot programmed into hardware, the done queue and the
//! consumer. Every move is by value, so a buffer can only ever be in one
//! of them.
//!
//! Locks, outermost first: `gate` (control path only), core lock
//! (interrupt dispatch only), `inner`, queue locks.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::consumer::{Delivery, DeliveryWorker, FrameConsumer, Registered};
use super::queue::BufferQueue;
use super::state::{PipelineState, StopOutcome};
use super::stats::{PathStats, StatsSnapshot};
use crate::capture::{BufferStatus, DmaWindow, FrameBuffer, FramePool, PixelFormat};
use crate::device::{CaptureCore, InterruptHandler};
use crate::error::{CaptureError, Result};
use crate::hw::{ChildId, Geometry, PathRegisters};
use crate::source::{Rect, VideoSource};
use crate::utils::frame_period;

/// Format requested for a capture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFormat {
    pub format: PixelFormat,
    /// Output frame size
    pub width: u32,
    pub height: u32,
    pub buffer_count: usize,
    /// Clipper only: source window to capture; defaults to the top-left
    /// `width` x `height` of the source crop.
    #[serde(default)]
    pub crop: Option<Rect>,
}

/// Probe-time parameters of a capture path.
#[derive(Debug, Clone, Copy)]
pub struct PathSettings {
    pub memory: DmaWindow,
    pub fps: u32,
    /// Frame periods `stop()` waits for the final interrupt.
    pub stop_timeout_frames: u32,
    pub delivery: Delivery,
}

impl PathSettings {
    pub fn stop_timeout(&self) -> Duration {
        frame_period(self.fps) * self.stop_timeout_frames.max(1)
    }
}

struct PathInner {
    state: PipelineState,
    regs: Box<dyn PathRegisters>,
    in_flight: Option<FrameBuffer>,
    pool: Option<FramePool>,
    format: Option<PathFormat>,
    /// Bumped on every pool rebuild to tell old buffers from new ones
    session: u64,
    sequence: u64,
    /// Inside an underrun streak; only the first one is logged loudly
    starved: bool,
}

impl PathInner {
    fn program(&mut self, buf: &FrameBuffer) {
        self.regs
            .set_buffer_address(&buf.addresses(), &buf.strides());
    }
}

/// One capture path on a capture core.
pub struct FrontEnd {
    child: ChildId,
    core: Arc<CaptureCore>,
    source: Arc<dyn VideoSource>,
    settings: PathSettings,
    /// Serialises start/stop/configure
    gate: Mutex<()>,
    inner: Mutex<PathInner>,
    /// Signalled when a pending stop has been acknowledged
    stopped: Condvar,
    empty: BufferQueue,
    done: BufferQueue,
    consumer: ArcSwapOption<Registered>,
    stats: PathStats,
    worker: Option<DeliveryWorker>,
    weak_self: Weak<FrontEnd>,
}

impl FrontEnd {
    /// Create a path. With [`Delivery::Deferred`] this spawns its delivery thread.
    pub fn new(
        child: ChildId,
        core: Arc<CaptureCore>,
        source: Arc<dyn VideoSource>,
        regs: Box<dyn PathRegisters>,
        settings: PathSettings,
    ) -> Result<Arc<Self>> {
        let mut spawn_error = None;
        let path = Arc::new_cyclic(|weak: &Weak<FrontEnd>| {
            let worker = match settings.delivery {
                Delivery::Inline => None,
                Delivery::Deferred => {
                    let weak = weak.clone();
                    let name = format!("vin{}-{}", core.module(), child);
                    DeliveryWorker::spawn(name, move || match weak.upgrade() {
                        Some(path) => {
                            path.deliver_done();
                            true
                        }
                        None => false,
                    })
                    .map_err(|e| spawn_error = Some(e))
                    .ok()
                }
            };

            FrontEnd {
                child,
                core,
                source,
                settings,
                gate: Mutex::new(()),
                inner: Mutex::new(PathInner {
                    state: PipelineState::Idle,
                    regs,
                    in_flight: None,
                    pool: None,
                    format: None,
                    session: 0,
                    sequence: 0,
                    starved: false,
                }),
                stopped: Condvar::new(),
                empty: BufferQueue::new(),
                done: BufferQueue::new(),
                consumer: ArcSwapOption::empty(),
                stats: PathStats::new(child),
                worker,
                weak_self: weak.clone(),
            }
        });

        if let Some(e) = spawn_error {
            return Err(CaptureError::Source(format!(
                "cannot spawn delivery worker: {}",
                e
            )));
        }
        Ok(path)
    }

    pub fn child(&self) -> ChildId {
        self.child
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    /// Pool index of the buffer hardware is currently writing.
    pub fn in_flight_index(&self) -> Option<usize> {
        self.inner.lock().in_flight.as_ref().map(FrameBuffer::index)
    }

    pub fn empty_len(&self) -> usize {
        self.empty.size()
    }

    pub fn done_len(&self) -> usize {
        self.done.size()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &PathSettings {
        &self.settings
    }

    /// Register the buffer consumer, replacing any previous one.
    pub fn set_consumer(&self, consumer: impl FrameConsumer + 'static) {
        self.consumer.store(Some(Arc::new(Registered {
            consumer: Box::new(consumer),
        })));
    }

    /// Drop the consumer. Refused while streaming, since buffers would have nowhere to go.
    pub fn clear_consumer(&self) -> Result<()> {
        let inner = self.inner.lock();
        if inner.state.is_streaming() {
            return Err(CaptureError::Busy(self.child));
        }
        self.consumer.store(None);
        Ok(())
    }

    /// Work out the hardware window for `fmt` against the current source crop.
    fn resolve_geometry(&self, fmt: &PathFormat) -> Result<Geometry> {
        let source = self.source.get_crop();
        if source.is_empty() {
            return Err(CaptureError::InvalidGeometry(format!(
                "source crop {}x{} is empty",
                source.width, source.height
            )));
        }

        match self.child {
            ChildId::Clipper => {
                let window = fmt
                    .crop
                    .unwrap_or_else(|| Rect::new(source.left, source.top, fmt.width, fmt.height));
                if window.width != fmt.width || window.height != fmt.height {
                    return Err(CaptureError::InvalidGeometry(format!(
                        "clip window {}x{} does not match output {}x{}",
                        window.width, window.height, fmt.width, fmt.height
                    )));
                }
                if !source.contains(&window) {
                    return Err(CaptureError::InvalidGeometry(format!(
                        "clip window {:?} outside source crop {:?}",
                        window, source
                    )));
                }
                Ok(Geometry {
                    input: window,
                    output_width: fmt.width,
                    output_height: fmt.height,
                })
            }
            ChildId::Decimator => {
                if fmt.width > source.width || fmt.height > source.height {
                    return Err(CaptureError::InvalidGeometry(format!(
                        "decimator cannot scale {}x{} up to {}x{}",
                        source.width, source.height, fmt.width, fmt.height
                    )));
                }
                Ok(Geometry {
                    input: source,
                    output_width: fmt.width,
                    output_height: fmt.height,
                })
            }
        }
    }

    /// Set the output format and rebuild the buffer pool.
    ///
    /// All new buffers start in the empty queue. Buffers of a previous pool
    /// still held by the consumer are rejected when returned.
    #[instrument(skip(self), fields(path = %self.child))]
    pub fn configure(&self, fmt: PathFormat) -> Result<()> {
        let _gate = self.gate.lock();

        if !fmt.format.supported_by(self.child) {
            return Err(CaptureError::UnsupportedFormat {
                child: self.child,
                format: fmt.format,
            });
        }
        let geometry = self.resolve_geometry(&fmt)?;
        let layout = fmt
            .format
            .layout(geometry.output_width, geometry.output_height)?;

        let mut inner = self.inner.lock();
        if inner.state.is_streaming() {
            return Err(CaptureError::Busy(self.child));
        }

        let session = inner.session + 1;
        let (pool, buffers) =
            FramePool::allocate(self.settings.memory, layout, fmt.buffer_count, session)?;
        inner.session = session;

        let stale = self.empty.clear(drop) + self.done.clear(drop);
        if stale > 0 {
            debug!(stale, "Released buffers of previous pool");
        }
        for buf in buffers {
            self.empty.enqueue(buf);
        }
        inner.pool = Some(pool);
        inner.format = Some(fmt);

        info!(
            format = ?fmt.format,
            width = fmt.width,
            height = fmt.height,
            buffers = fmt.buffer_count,
            "Path configured"
        );
        Ok(())
    }

    /// Hand a buffer back for capture.
    ///
    /// While streaming with nothing on hardware (after an underrun) the
    /// buffer is programmed straight away; otherwise it joins the empty queue.
    pub fn queue_buffer(&self, mut buf: FrameBuffer) -> Result<()> {
        buf.recycle();
        let mut inner = self.inner.lock();
        if !inner.pool.as_ref().is_some_and(|pool| pool.owns(&buf)) {
            return Err(CaptureError::ForeignBuffer(buf.index()));
        }

        if inner.state == PipelineState::Running && inner.in_flight.is_none() {
            inner.program(&buf);
            debug!(path = %self.child, index = buf.index(), "Re-primed hardware after underrun");
            inner.in_flight = Some(buf);
            inner.starved = false;
        } else {
            self.empty.enqueue(buf);
        }
        Ok(())
    }

    /// Start streaming: source on, geometry and first buffer programmed,
    /// interrupt handler registered, path enabled on the core.
    #[instrument(skip(self), fields(path = %self.child))]
    pub fn start(&self) -> Result<()> {
        let _gate = self.gate.lock();

        let fmt = {
            let inner = self.inner.lock();
            if inner.state.start().is_none() {
                return Err(CaptureError::AlreadyRunning(self.child));
            }
            inner.format.ok_or(CaptureError::NoBuffers(self.child))?
        };
        if self.consumer.load().is_none() {
            return Err(CaptureError::NoConsumer(self.child));
        }
        if self.empty.is_empty() {
            return Err(CaptureError::NoBuffers(self.child));
        }
        let geometry = self.resolve_geometry(&fmt)?;

        self.source
            .set_stream(true)
            .map_err(CaptureError::Source)?;

        let handler: Arc<dyn InterruptHandler> = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return Err(CaptureError::NotRegistered(self.child)),
        };
        if let Err(e) = self.core.register_child(handler) {
            self.release_source();
            return Err(e);
        }

        {
            let mut inner = self.inner.lock();
            let Some(first) = self.empty.dequeue() else {
                drop(inner);
                self.rollback_start();
                return Err(CaptureError::NoBuffers(self.child));
            };
            inner.regs.set_format(fmt.format);
            inner.regs.set_geometry(&geometry);
            inner.program(&first);
            inner.in_flight = Some(first);
            inner.sequence = 0;
            inner.starved = false;
            inner.regs.set_enable(true);
            inner.state = PipelineState::Running;
        }
        self.core.run(self.child);

        info!(
            input = ?geometry.input,
            output_width = geometry.output_width,
            output_height = geometry.output_height,
            "Streaming started"
        );
        Ok(())
    }

    fn rollback_start(&self) {
        if let Err(e) = self.core.unregister_child(self.child) {
            error!(path = %self.child, "Rollback failed: {}", e);
        }
        self.release_source();
    }

    fn release_source(&self) {
        if let Err(e) = self.source.set_stream(false) {
            warn!(path = %self.child, "Source refused to stop: {}", e);
        }
    }

    /// Stop streaming. Always returns within the stop timeout.
    ///
    /// The next frame interrupt is taken as the last one; if none arrives
    /// in time the path is disabled anyway. With no buffer on hardware the
    /// path is disabled at once. Every buffer the pipeline holds
    /// goes back to the consumer as [`BufferStatus::Aborted`].
    #[instrument(skip(self), fields(path = %self.child))]
    pub fn stop(&self) -> StopOutcome {
        let _gate = self.gate.lock();
        let timeout = self.settings.stop_timeout();

        let started = Instant::now();
        let mut inner = self.inner.lock();
        let outcome = if inner.in_flight.is_none() {
            // Underrun: hardware holds no buffer, no final interrupt to wait for
            match inner.state.halt() {
                Some(idle) => {
                    inner.regs.set_enable(false);
                    inner.state = idle;
                    StopOutcome::NothingInFlight
                }
                None => return StopOutcome::AlreadyIdle,
            }
        } else {
            match inner.state.request_stop() {
                Some(next) => inner.state = next,
                None => return StopOutcome::AlreadyIdle,
            }
            self.stopped
                .wait_while_for(&mut inner, |i| i.state == PipelineState::Stopping, timeout);

            match inner.state.finish_stop() {
                Some(idle) => {
                    inner.regs.set_enable(false);
                    inner.state = idle;
                    StopOutcome::Forced
                }
                None => StopOutcome::Clean,
            }
        };
        let in_flight = inner.in_flight.take();
        drop(inner);

        self.core.stop(self.child);
        if let Err(e) = self.core.unregister_child(self.child) {
            error!("Interrupt handler missing at stop: {}", e);
        }
        self.release_source();

        let aborted = self.abort_all(in_flight);
        self.stats.stopped(outcome);

        match outcome {
            StopOutcome::Forced => warn!(
                waited_ms = started.elapsed().as_millis() as u64,
                aborted,
                "No final interrupt, stop forced"
            ),
            _ => info!(
                waited_ms = started.elapsed().as_millis() as u64,
                aborted,
                "Streaming stopped"
            ),
        }
        outcome
    }

    /// Return every buffer held by the pipeline to the consumer as aborted.
    fn abort_all(&self, in_flight: Option<FrameBuffer>) -> usize {
        let consumer = self.consumer.load_full();
        let mut give_back = |buf: FrameBuffer| match &consumer {
            Some(c) => c.consumer.buffer_done(buf, BufferStatus::Aborted),
            // Unreachable while streaming; keep the buffer rather than lose it
            None => self.empty.enqueue(buf),
        };

        // Completion order: finished frames, then the one on hardware
        let mut aborted = self.done.clear(&mut give_back);
        if let Some(buf) = in_flight {
            give_back(buf);
            aborted += 1;
        }
        if consumer.is_some() {
            aborted += self.empty.clear(&mut give_back);
        }
        self.stats.aborted(aborted as u64);
        aborted
    }

    /// Hand everything in the done queue to the consumer, oldest first.
    fn deliver_done(&self) {
        let consumer = self.consumer.load_full();
        while let Some(buf) = self.done.dequeue() {
            match &consumer {
                Some(c) => {
                    self.stats.delivered();
                    c.consumer.buffer_done(buf, BufferStatus::Done);
                }
                None => {
                    warn!(path = %self.child, "No consumer, recycling completed buffer");
                    self.empty.enqueue(buf);
                }
            }
        }
    }
}

impl InterruptHandler for FrontEnd {
    fn child(&self) -> ChildId {
        self.child
    }

    fn on_frame_done(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PipelineState::Idle => return,
                PipelineState::Stopping => {
                    // Final interrupt: hardware off, stop() finishes the teardown
                    inner.regs.set_enable(false);
                    if let Some(idle) = inner.state.finish_stop() {
                        inner.state = idle;
                    }
                    self.stopped.notify_all();
                    return;
                }
                PipelineState::Running => {}
            }

            inner.sequence += 1;
            let sequence = inner.sequence;
            match inner.in_flight.take() {
                Some(mut completed) => {
                    completed.mark_completed(sequence);
                    self.done.enqueue(completed);
                }
                None => self.stats.dropped(),
            }

            match self.empty.dequeue() {
                Some(next) => {
                    inner.program(&next);
                    inner.in_flight = Some(next);
                    inner.starved = false;
                }
                None => {
                    // Address registers keep their last value until a buffer returns
                    self.stats.underrun();
                    if inner.starved {
                        debug!(path = %self.child, sequence, "Still no empty buffer");
                    } else {
                        warn!(path = %self.child, sequence, "Buffer underrun, skipping reprogram");
                        inner.starved = true;
                    }
                }
            }
        }

        match &self.worker {
            Some(worker) => worker.ring(),
            None => self.deliver_done(),
        }
    }
}
