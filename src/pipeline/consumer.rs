//! Downstream consumer registration and delivery.

use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::capture::{BufferStatus, FrameBuffer};

/// Receiver of completed (or aborted) buffers.
///
/// The consumer owns every buffer it is handed and must eventually give it
/// back through `FrontEnd::queue_buffer`. With [`Delivery::Inline`] it is
/// called from interrupt dispatch and must not block.
pub trait FrameConsumer: Send + Sync {
    fn buffer_done(&self, buf: FrameBuffer, status: BufferStatus);
}

impl<F> FrameConsumer for F
where
    F: Fn(FrameBuffer, BufferStatus) + Send + Sync,
{
    fn buffer_done(&self, buf: FrameBuffer, status: BufferStatus) {
        self(buf, status)
    }
}

/// Where completed buffers are handed to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Directly from the interrupt handler
    #[default]
    Inline,
    /// From a per-path worker thread woken by the interrupt handler
    Deferred,
}

/// Registered consumer, boxed so it can sit behind an `ArcSwapOption`.
pub(crate) struct Registered {
    pub(crate) consumer: Box<dyn FrameConsumer>,
}

/// Background thread draining the done queue for deferred delivery.
pub(crate) struct DeliveryWorker {
    doorbell: flume::Sender<()>,
    _handle: JoinHandle<()>,
}

impl DeliveryWorker {
    /// Spawn a worker calling `drain` every time it is woken.
    ///
    /// The thread exits once the worker is dropped or `drain` reports the
    /// path is gone.
    pub(crate) fn spawn<F>(name: String, drain: F) -> std::io::Result<Self>
    where
        F: Fn() -> bool + Send + 'static,
    {
        // One pending wake-up is enough: each drain empties the whole queue
        let (doorbell, rx) = flume::bounded::<()>(1);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(worker = %name, "Delivery worker started");
            while rx.recv().is_ok() {
                if !drain() {
                    break;
                }
            }
            debug!(worker = %name, "Delivery worker exiting");
        })?;
        Ok(Self {
            doorbell,
            _handle: handle,
        })
    }

    /// Wake the worker. Never blocks.
    pub(crate) fn ring(&self) {
        match self.doorbell.try_send(()) {
            Ok(()) | Err(flume::TrySendError::Full(())) => {}
            Err(flume::TrySendError::Disconnected(())) => {
                error!("Delivery worker is gone, completed buffers will stall");
            }
        }
    }
}
