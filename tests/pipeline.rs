//! End-to-end behaviour of capture paths on simulated hardware

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use vinpipe::capture::{BufferStatus, DmaWindow, FrameBuffer, PixelFormat};
use vinpipe::device::{CaptureCore, IrqReturn};
use vinpipe::hw::sim::{SimCore, SimPath};
use vinpipe::hw::{ChildId, ChildMask};
use vinpipe::pipeline::{Delivery, FrontEnd, PathFormat, PathSettings, PipelineState, StopOutcome};
use vinpipe::source::{Rect, StaticSource};
use vinpipe::CaptureError;

type Received = Arc<Mutex<Vec<(FrameBuffer, BufferStatus)>>>;

const FPS: u32 = 50;

struct Harness {
    sim: SimCore,
    core: Arc<CaptureCore>,
    source: Arc<StaticSource>,
}

struct Path {
    fe: Arc<FrontEnd>,
    regs: SimPath,
    received: Received,
}

impl Harness {
    fn new() -> Self {
        let sim = SimCore::new();
        let core = Arc::new(CaptureCore::new(0, Box::new(sim.clone())));
        Self {
            sim,
            core,
            source: Arc::new(StaticSource::new(1920, 1080)),
        }
    }

    fn path(&self, child: ChildId, delivery: Delivery) -> Path {
        let regs = SimPath::new();
        let settings = PathSettings {
            memory: DmaWindow {
                base: match child {
                    ChildId::Clipper => 0x4000_0000,
                    ChildId::Decimator => 0x4400_0000,
                },
                size: 64 << 20,
            },
            fps: FPS,
            stop_timeout_frames: 2,
            delivery,
        };
        let fe = FrontEnd::new(
            child,
            self.core.clone(),
            self.source.clone(),
            Box::new(regs.clone()),
            settings,
        )
        .unwrap();

        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        fe.set_consumer(move |buf: FrameBuffer, status: BufferStatus| {
            sink.lock().push((buf, status));
        });
        Path { fe, regs, received }
    }

    fn irq(&self) {
        assert!(self.sim.raise(), "frame interrupt is masked");
        assert_eq!(self.core.handle_interrupt(), IrqReturn::Handled);
    }
}

impl Path {
    fn take(&self) -> Vec<(FrameBuffer, BufferStatus)> {
        std::mem::take(&mut *self.received.lock())
    }

    fn return_all(&self) {
        for (buf, _) in self.take() {
            self.fe.queue_buffer(buf).unwrap();
        }
    }
}

fn nv12(width: u32, height: u32, buffer_count: usize) -> PathFormat {
    PathFormat {
        format: PixelFormat::Nv12,
        width,
        height,
        buffer_count,
        crop: None,
    }
}

fn stop_timeout() -> Duration {
    vinpipe::utils::frame_period(FPS) * 2
}

#[test]
fn test_four_buffer_session() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(1280, 720, 4)).unwrap();
    p.fe.start().unwrap();

    assert_eq!(p.fe.state(), PipelineState::Running);
    assert_eq!(p.fe.in_flight_index(), Some(0));
    assert!(h.source.is_streaming());
    assert_eq!(h.core.running(), ChildMask::CLIPPER);

    for _ in 0..4 {
        h.irq();
    }

    let delivered = p.take();
    let order: Vec<usize> = delivered.iter().map(|(b, _)| b.index()).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert!(delivered.iter().all(|(_, s)| *s == BufferStatus::Done));
    let sequences: Vec<u64> = delivered.iter().map(|(b, _)| b.sequence()).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    assert_eq!(p.fe.empty_len(), 0);
    assert_eq!(p.fe.done_len(), 0);
    assert_eq!(p.fe.in_flight_index(), None);
    assert_eq!(p.fe.stats().underruns, 1);

    for (buf, _) in delivered {
        p.fe.queue_buffer(buf).unwrap();
    }
    h.irq();

    let delivered = p.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.index(), 0);
    assert_eq!(p.fe.in_flight_index(), Some(1));
    assert_eq!(p.fe.stats().frames_delivered, 5);

    assert_eq!(p.fe.stop(), StopOutcome::Forced);
}

#[test]
fn test_underrun_recovery() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 2)).unwrap();
    p.fe.start().unwrap();

    // Both buffers completed, nothing left to program
    h.irq();
    h.irq();
    assert_eq!(p.fe.empty_len(), 0);
    assert_eq!(p.fe.in_flight_index(), None);
    assert_eq!(p.fe.stats().underruns, 1);

    let mut held = p.take();
    assert_eq!(held.len(), 2);
    let (first, _) = held.remove(0);
    assert_eq!(first.index(), 0);
    let first_addr = first.planes()[0].addr;

    let writes_before = p.regs.snapshot().address_writes.len();
    p.fe.queue_buffer(first).unwrap();

    // Returned buffer goes straight to hardware
    assert_eq!(p.fe.in_flight_index(), Some(0));
    assert_eq!(p.fe.empty_len(), 0);
    let snap = p.regs.snapshot();
    assert_eq!(snap.address_writes.len(), writes_before + 1);
    assert_eq!(snap.current_address(), Some(first_addr));

    h.irq();

    let delivered = p.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.index(), 0);
    assert_eq!(delivered[0].1, BufferStatus::Done);
    assert_eq!(delivered[0].0.sequence(), 3);
    assert_eq!(p.fe.stats().frames_delivered, 3);
    assert_eq!(p.fe.stats().frames_dropped, 0);

    p.fe.stop();
}

#[test]
fn test_stop_during_underrun_is_immediate() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 2)).unwrap();
    p.fe.start().unwrap();
    h.irq();
    h.irq();
    assert_eq!(p.fe.in_flight_index(), None);

    let started = Instant::now();
    let outcome = p.fe.stop();
    let elapsed = started.elapsed();

    assert_eq!(outcome, StopOutcome::NothingInFlight);
    assert!(elapsed < vinpipe::utils::frame_period(FPS));

    assert_eq!(p.fe.state(), PipelineState::Idle);
    assert!(!p.regs.snapshot().enabled);
    assert!(h.core.running().is_empty());
    assert_eq!(h.core.registered(), 0);
    assert!(!h.source.is_streaming());
    assert!(!h.sim.raise(), "interrupt still unmasked after stop");

    let stats = p.fe.stats();
    assert_eq!(stats.immediate_stops, 1);
    assert_eq!(stats.forced_stops, 0);
    assert_eq!(stats.buffers_aborted, 0);

    // The consumer already holds both buffers
    let received = p.take();
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|(_, s)| *s == BufferStatus::Done));

    assert_eq!(p.fe.stop(), StopOutcome::AlreadyIdle);
}

#[test]
fn test_underrun_leaves_address_untouched() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 2)).unwrap();
    p.fe.start().unwrap();

    h.irq();
    h.irq();
    let writes = p.regs.snapshot().address_writes.clone();
    h.irq();
    h.irq();

    assert_eq!(p.regs.snapshot().address_writes, writes);
    let stats = p.fe.stats();
    assert_eq!(stats.frames_delivered, 2);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.underruns, 3);
    assert_eq!(p.fe.state(), PipelineState::Running);

    p.fe.stop();
}

#[test]
fn test_start_while_running_rejected() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 4)).unwrap();
    p.fe.start().unwrap();

    let regs_before = p.regs.snapshot();
    let core_before = h.sim.snapshot();
    let empty_before = p.fe.empty_len();

    assert!(matches!(
        p.fe.start(),
        Err(CaptureError::AlreadyRunning(ChildId::Clipper))
    ));
    assert_eq!(p.regs.snapshot().address_writes, regs_before.address_writes);
    assert_eq!(h.sim.snapshot().enable_writes, core_before.enable_writes);
    assert_eq!(p.fe.empty_len(), empty_before);
    assert_eq!(h.core.registered(), 1);

    p.fe.stop();
}

#[test]
fn test_stop_when_idle_is_noop() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 4)).unwrap();

    assert_eq!(p.fe.stop(), StopOutcome::AlreadyIdle);
    assert_eq!(p.fe.state(), PipelineState::Idle);
    assert_eq!(p.fe.empty_len(), 4);
    assert!(p.take().is_empty());
    assert_eq!(h.sim.snapshot().enable_writes, 0);
}

#[test]
fn test_forced_stop_is_bounded() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 4)).unwrap();
    p.fe.start().unwrap();
    h.irq();

    let started = Instant::now();
    let outcome = p.fe.stop();
    let elapsed = started.elapsed();

    assert_eq!(outcome, StopOutcome::Forced);
    assert!(elapsed >= stop_timeout() - Duration::from_millis(1));
    assert!(elapsed < stop_timeout() + Duration::from_millis(250));

    assert_eq!(p.fe.state(), PipelineState::Idle);
    assert!(!p.regs.snapshot().enabled);
    assert!(h.core.running().is_empty());
    assert_eq!(h.core.registered(), 0);
    assert!(!h.source.is_streaming());
    assert_eq!(p.fe.stats().forced_stops, 1);

    // One delivered frame plus three aborted buffers, nothing lost
    let received = p.take();
    let done = received
        .iter()
        .filter(|(_, s)| *s == BufferStatus::Done)
        .count();
    let aborted = received
        .iter()
        .filter(|(_, s)| *s == BufferStatus::Aborted)
        .count();
    assert_eq!((done, aborted), (1, 3));
    assert_eq!(p.fe.empty_len() + p.fe.done_len(), 0);
}

#[test]
fn test_clean_stop_on_interrupt() {
    let h = Arc::new(Harness::new());
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 4)).unwrap();
    p.fe.start().unwrap();

    let fe = p.fe.clone();
    let ticker = {
        let h = h.clone();
        let fe = fe.clone();
        thread::spawn(move || {
            while fe.state() != PipelineState::Idle {
                thread::sleep(Duration::from_millis(2));
                if h.sim.raise() {
                    h.core.handle_interrupt();
                }
            }
        })
    };

    let started = Instant::now();
    let outcome = p.fe.stop();
    let elapsed = started.elapsed();
    ticker.join().unwrap();

    assert_eq!(outcome, StopOutcome::Clean);
    assert!(elapsed < stop_timeout() + Duration::from_millis(250));
    assert_eq!(p.fe.stats().clean_stops, 1);
    assert!(!p.regs.snapshot().enabled);

    // Every buffer ends up with the consumer exactly once, delivered or aborted
    let received = p.take();
    let indices: HashSet<usize> = received.iter().map(|(b, _)| b.index()).collect();
    assert_eq!(received.len(), 4);
    assert_eq!(indices.len(), 4);
}

#[test]
fn test_restart_after_stop() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 3)).unwrap();
    p.fe.start().unwrap();
    h.irq();
    p.fe.stop();

    // Without buffers back in the empty queue there is nothing to capture into
    assert!(matches!(p.fe.start(), Err(CaptureError::NoBuffers(_))));

    p.return_all();
    assert_eq!(p.fe.empty_len(), 3);
    p.fe.start().unwrap();
    h.irq();

    let delivered = p.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.sequence(), 1);
    p.fe.stop();
}

#[test]
fn test_concurrent_start_and_stop() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 4)).unwrap();

    for _ in 0..10 {
        let barrier = Arc::new(Barrier::new(2));
        let starter = {
            let fe = p.fe.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                fe.start().is_ok()
            })
        };
        let stopper = {
            let fe = p.fe.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                fe.stop()
            })
        };
        let started = starter.join().unwrap();
        let outcome = stopper.join().unwrap();
        assert!(started);

        match p.fe.state() {
            PipelineState::Running => {
                // stop ran first
                assert_eq!(outcome, StopOutcome::AlreadyIdle);
                assert!(p.fe.in_flight_index().is_some());
                assert_eq!(h.core.running(), ChildMask::CLIPPER);
                assert_eq!(h.core.registered(), 1);
                p.fe.stop();
            }
            PipelineState::Idle => {
                assert_eq!(outcome, StopOutcome::Forced);
                assert!(p.fe.in_flight_index().is_none());
            }
            PipelineState::Stopping => panic!("torn state after concurrent start/stop"),
        }

        assert!(h.core.running().is_empty());
        assert_eq!(h.core.registered(), 0);
        p.return_all();
        assert_eq!(p.fe.empty_len(), 4);
    }
}

#[test]
fn test_buffer_held_in_one_place() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(320, 240, 4)).unwrap();
    p.fe.start().unwrap();

    let mut held: Vec<FrameBuffer> = Vec::new();
    for step in 0..120u32 {
        match step % 5 {
            0 | 1 | 3 => h.irq(),
            _ => {
                // Return the two oldest held buffers
                let n = held.len().min(2);
                for buf in held.drain(..n) {
                    p.fe.queue_buffer(buf).unwrap();
                }
            }
        }
        held.extend(p.take().into_iter().map(|(b, _)| b));

        let mut indices: Vec<usize> = held.iter().map(FrameBuffer::index).collect();
        indices.extend(p.fe.in_flight_index());
        let unique: HashSet<usize> = indices.iter().copied().collect();
        assert_eq!(unique.len(), indices.len(), "buffer owned twice at step {}", step);
        assert_eq!(indices.len() + p.fe.empty_len() + p.fe.done_len(), 4);
    }

    p.fe.stop();
}

#[test]
fn test_deferred_delivery_keeps_order() {
    let h = Harness::new();
    let p = h.path(ChildId::Decimator, Delivery::Deferred);
    p.fe.configure(nv12(640, 360, 4)).unwrap();
    p.fe.start().unwrap();

    h.irq();
    h.irq();
    h.irq();

    let deadline = Instant::now() + Duration::from_secs(2);
    while p.received.lock().len() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    let delivered = p.take();
    let sequences: Vec<u64> = delivered.iter().map(|(b, _)| b.sequence()).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(p.fe.done_len(), 0);

    p.fe.stop();
}

#[test]
fn test_decimator_geometry() {
    let h = Harness::new();
    let p = h.path(ChildId::Decimator, Delivery::Inline);

    assert!(matches!(
        p.fe.configure(nv12(3840, 2160, 4)),
        Err(CaptureError::InvalidGeometry(_))
    ));
    assert!(matches!(
        p.fe.configure(PathFormat {
            format: PixelFormat::Rgb24,
            ..nv12(640, 360, 4)
        }),
        Err(CaptureError::UnsupportedFormat { .. })
    ));

    p.fe.configure(nv12(640, 360, 4)).unwrap();
    p.fe.start().unwrap();

    let snap = p.regs.snapshot();
    let geometry = snap.geometry.unwrap();
    assert_eq!(geometry.input, Rect::new(0, 0, 1920, 1080));
    assert_eq!((geometry.output_width, geometry.output_height), (640, 360));
    assert_eq!(snap.format, Some(PixelFormat::Nv12));
    assert!(snap.enabled);

    p.fe.stop();
}

#[test]
fn test_clipper_window_must_fit_source() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);

    let outside = PathFormat {
        crop: Some(Rect::new(1600, 0, 640, 480)),
        ..nv12(640, 480, 4)
    };
    assert!(matches!(
        p.fe.configure(outside),
        Err(CaptureError::InvalidGeometry(_))
    ));

    let inside = PathFormat {
        crop: Some(Rect::new(320, 180, 640, 480)),
        ..nv12(640, 480, 4)
    };
    p.fe.configure(inside).unwrap();
    p.fe.start().unwrap();
    assert_eq!(
        p.regs.snapshot().geometry.unwrap().input,
        Rect::new(320, 180, 640, 480)
    );
    p.fe.stop();
}

#[test]
fn test_start_preconditions() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    assert!(matches!(p.fe.start(), Err(CaptureError::NoBuffers(_))));

    p.fe.configure(nv12(640, 480, 2)).unwrap();
    p.fe.clear_consumer().unwrap();
    assert!(matches!(p.fe.start(), Err(CaptureError::NoConsumer(_))));

    assert_eq!(p.fe.state(), PipelineState::Idle);
    assert_eq!(h.core.registered(), 0);
    assert!(!h.source.is_streaming());
}

#[test]
fn test_reconfigure_rejects_old_buffers() {
    let h = Harness::new();
    let p = h.path(ChildId::Clipper, Delivery::Inline);
    p.fe.configure(nv12(640, 480, 2)).unwrap();
    p.fe.start().unwrap();
    h.irq();
    assert!(matches!(
        p.fe.configure(nv12(320, 240, 2)),
        Err(CaptureError::Busy(_))
    ));
    p.fe.stop();

    p.fe.configure(nv12(320, 240, 2)).unwrap();
    let (old, _) = p.take().into_iter().next().unwrap();
    assert!(matches!(
        p.fe.queue_buffer(old),
        Err(CaptureError::ForeignBuffer(_))
    ));
    assert_eq!(p.fe.empty_len(), 2);
}

#[test]
fn test_paths_share_core() {
    let h = Harness::new();
    let clip = h.path(ChildId::Clipper, Delivery::Inline);
    let dec = h.path(ChildId::Decimator, Delivery::Inline);
    clip.fe.configure(nv12(1920, 1080, 3)).unwrap();
    dec.fe.configure(nv12(480, 270, 3)).unwrap();

    clip.fe.start().unwrap();
    dec.fe.start().unwrap();
    assert_eq!(h.core.running(), ChildMask::all());
    assert_eq!(h.core.registered(), 2);

    h.irq();
    assert_eq!(clip.take().len(), 1);
    assert_eq!(dec.take().len(), 1);

    dec.fe.stop();
    assert_eq!(h.core.running(), ChildMask::CLIPPER);
    assert!(h.sim.snapshot().irq_enabled);

    h.irq();
    assert_eq!(clip.take().len(), 1);
    assert!(dec.take().is_empty());

    clip.fe.stop();
    assert!(!h.sim.snapshot().irq_enabled);
}
