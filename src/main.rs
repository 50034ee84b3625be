//! vinpipe capture pipeline demo on simulated hardware

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use vinpipe::capture::{BufferStatus, FrameBuffer};
use vinpipe::device::CoreRegistry;
use vinpipe::hw::sim::{SimCore, SimPath};
use vinpipe::hw::ChildId;
use vinpipe::pipeline::FrontEnd;
use vinpipe::source::StaticSource;
use vinpipe::{utils, Config, PathConfig};

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vinpipe=debug"));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    registry.with(tracing_tracy::TracyLayer::default()).init();
    #[cfg(not(feature = "profiling"))]
    registry.init();
}

/// Build a path whose consumer hands every completed buffer straight back.
fn build_path(
    child: ChildId,
    config: &PathConfig,
    core: &Arc<vinpipe::device::CaptureCore>,
    source: &Arc<StaticSource>,
) -> Result<(Arc<FrontEnd>, SimPath)> {
    let regs = SimPath::new();
    let path = FrontEnd::new(
        child,
        core.clone(),
        source.clone(),
        Box::new(regs.clone()),
        config.settings(),
    )?;

    let weak: Weak<FrontEnd> = Arc::downgrade(&path);
    path.set_consumer(move |buf: FrameBuffer, status: BufferStatus| {
        let Some(path) = weak.upgrade() else { return };
        if status == BufferStatus::Done && buf.sequence() % 100 == 0 {
            info!(path = %child, sequence = buf.sequence(), index = buf.index(), "Frame");
        }
        if let Err(e) = path.queue_buffer(buf) {
            error!(path = %child, "Could not requeue buffer: {}", e);
        }
    });
    path.configure(config.format)?;
    Ok((path, regs))
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("vinpipe launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let sim_core = SimCore::new();
    let mut registry = CoreRegistry::new();
    let core = registry.insert(config.core.module, Box::new(sim_core.clone()));
    let source = Arc::new(StaticSource::new(
        config.core.source_width,
        config.core.source_height,
    ));

    let mut paths = Vec::new();
    for (child, path_config) in [
        (ChildId::Clipper, &config.clipper),
        (ChildId::Decimator, &config.decimator),
    ] {
        if let Some(path_config) = path_config {
            paths.push(build_path(child, path_config, &core, &source)?);
        }
    }
    if paths.is_empty() {
        return Err(eyre!("configuration enables no capture path"));
    }

    for (path, _) in &paths {
        path.start()?;
    }

    // Stand-in for the sensor: one frame interrupt per frame period
    let fps = paths
        .iter()
        .map(|(p, _)| p.settings().fps)
        .max()
        .unwrap_or(30);
    let running = Arc::new(AtomicBool::new(true));
    let irq_thread = {
        let running = running.clone();
        let core = registry.get(config.core.module)?;
        let sim_core = sim_core.clone();
        thread::Builder::new()
            .name("vin-irq".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(utils::frame_period(fps));
                    if sim_core.raise() {
                        core.handle_interrupt();
                    }
                }
            })?
    };

    thread::sleep(Duration::from_secs(3));

    for (path, _) in &paths {
        let outcome = path.stop();
        info!(path = %path.child(), ?outcome, "Stopped");
    }
    running.store(false, Ordering::Release);
    irq_thread
        .join()
        .map_err(|_| eyre!("interrupt thread panicked"))?;

    for (path, regs) in &paths {
        let stats = path.stats();
        info!(
            path = %path.child(),
            delivered = stats.frames_delivered,
            dropped = stats.frames_dropped,
            underruns = stats.underruns,
            aborted = stats.buffers_aborted,
            address_writes = regs.snapshot().address_writes.len(),
            "Path statistics"
        );
    }

    info!("vinpipe shutting down");
    Ok(())
}
