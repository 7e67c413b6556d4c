//! Transport controller
//!
//! Owns the device claim, the outbound queue, and both workers for one
//! session. Lifecycle:
//!
//! ```text
//! Idle --start()--> Connected --stop()--> Stopping --> Idle
//! ```
//!
//! `start` selects the first matching device in enumeration order. When
//! several interfaces match, which one wins is whatever the OS enumerates
//! first; there is no tie-break by serial number or attach time.
//!
//! Shutdown happens in three separate steps: signal both workers, wait for
//! each with a bounded timeout, then release the claim whatever the waits
//! returned. A stuck worker can outlive `stop`, but the claim never does.

use crate::device::{DeviceIdentifier, DeviceInfo, UsbDevice, split};
use crate::error::{Result, TransportError};
use crate::frame::{Frame, FrameCodec, RawFrameCodec};
use crate::locator::DeviceLocator;
use crate::queue::{FrameSender, OutboundQueue};
use crate::settings::TransportSettings;
use crate::worker::{
    ReceiveWorker, SendWorker, WorkerHandle, WorkerReport, WorkerSnapshot, WorkerState,
};
use async_channel::Sender;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Thread name of the send worker
pub const SEND_WORKER_NAME: &str = "knx-usb-send";
/// Thread name of the receive worker
pub const RECEIVE_WORKER_NAME: &str = "knx-usb-receive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Connected,
    Stopping,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "Idle"),
            ControllerState::Connected => write!(f, "Connected"),
            ControllerState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Health snapshot for the owning system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHealth {
    pub state: ControllerState,
    /// Selected device, if any
    pub device: Option<DeviceInfo>,
    pub claimed: bool,
    /// Frames waiting in the outbound queue
    pub queued: usize,
    /// Frames evicted from a full queue under `drop_oldest`
    pub evicted: u64,
    pub send_worker: Option<WorkerSnapshot>,
    pub receive_worker: Option<WorkerSnapshot>,
}

impl TransportHealth {
    /// Connected and claimed, with both workers still running
    pub fn is_healthy(&self) -> bool {
        let running = |worker: &Option<WorkerSnapshot>| {
            worker
                .as_ref()
                .is_some_and(|s| s.state == WorkerState::Running)
        };
        self.state == ControllerState::Connected
            && self.claimed
            && running(&self.send_worker)
            && running(&self.receive_worker)
    }
}

/// Outcome of `stop()`
///
/// Empty when `stop()` had nothing to tear down.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub send_worker: Option<WorkerReport>,
    pub receive_worker: Option<WorkerReport>,
    /// Whether a live claim was released
    pub released: bool,
    /// Frames evicted from a full queue under `drop_oldest` during the session
    pub evicted: u64,
}

impl ShutdownReport {
    /// Both workers terminated within the join timeout
    pub fn all_joined(&self) -> bool {
        [&self.send_worker, &self.receive_worker]
            .into_iter()
            .flatten()
            .all(|report| report.joined)
    }

    /// Frames queued for sending that were never written
    pub fn abandoned_frames(&self) -> u64 {
        self.send_worker
            .as_ref()
            .map_or(0, |report| report.snapshot.dropped)
    }

    /// The first fatal worker failure, if a worker ended on one
    pub fn fatal_error(&self) -> Option<&crate::worker::WorkerError> {
        [&self.send_worker, &self.receive_worker]
            .into_iter()
            .flatten()
            .filter(|report| report.snapshot.fatal)
            .find_map(|report| report.snapshot.last_error.as_ref())
    }
}

/// The workers and queue bound to one claim
struct Session {
    queue: OutboundQueue,
    send_worker: WorkerHandle,
    receive_worker: WorkerHandle,
}

/// Bridges a synchronous `send` API and an inbound sink to one USB device
///
/// Lifecycle methods take `&mut self`, so no `send` can race a `start` or
/// `stop` on the same controller. Other threads enqueue through
/// [`FrameSender`] handles from [`TransportController::sender`].
pub struct TransportController<L: DeviceLocator, C: FrameCodec = RawFrameCodec> {
    identifier: DeviceIdentifier,
    locator: L,
    codec: Arc<C>,
    settings: TransportSettings,
    inbound: Sender<Frame>,
    state: ControllerState,
    device: Option<Arc<L::Device>>,
    session: Option<Session>,
}

impl<L: DeviceLocator> TransportController<L, RawFrameCodec> {
    /// Controller using the pass-through codec
    ///
    /// Received frames are pushed into `inbound`.
    pub fn new(identifier: DeviceIdentifier, locator: L, inbound: Sender<Frame>) -> Self {
        Self::with_codec(identifier, locator, RawFrameCodec, inbound)
    }
}

impl<L: DeviceLocator, C: FrameCodec> TransportController<L, C> {
    pub fn with_codec(
        identifier: DeviceIdentifier,
        locator: L,
        codec: C,
        inbound: Sender<Frame>,
    ) -> Self {
        Self {
            identifier,
            locator,
            codec: Arc::new(codec),
            settings: TransportSettings::default(),
            inbound,
            state: ControllerState::Idle,
            device: None,
            session: None,
        }
    }

    /// Apply validated settings; they take effect at the next `start`
    pub fn with_settings(mut self, settings: TransportSettings) -> Result<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn identifier(&self) -> DeviceIdentifier {
        self.identifier
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Descriptor of the selected device, if one is selected
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_deref().map(|device| device.info())
    }

    /// Discover and claim a device, then launch both workers
    ///
    /// On error the controller stays `Idle` with no claim held.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ControllerState::Idle {
            return Err(TransportError::AlreadyStarted);
        }

        let device = self
            .locator
            .find_devices(self.identifier)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                let err = TransportError::DeviceNotFound {
                    vendor_id: self.identifier.vendor_id,
                    product_id: self.identifier.product_id,
                };
                error!("{}", err);
                err
            })?;
        let device = Arc::new(device);

        device.claim()?;
        info!("Claimed KNX USB device {}", device.info());

        let session = match self.launch(&device) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to start workers: {}", e);
                device.release();
                return Err(e);
            }
        };

        self.device = Some(device);
        self.session = Some(session);
        self.state = ControllerState::Connected;
        Ok(())
    }

    fn launch(&self, device: &Arc<L::Device>) -> Result<Session> {
        let queue = OutboundQueue::new(&self.settings.queue);
        let (reader, writer) = split(device);

        let send_worker = WorkerHandle::spawn(
            SEND_WORKER_NAME,
            SendWorker {
                writer,
                codec: Arc::clone(&self.codec),
                outbound: queue.receiver(),
                write_timeout: self.settings.write_timeout(),
            },
        )?;

        let receive_worker = match WorkerHandle::spawn(
            RECEIVE_WORKER_NAME,
            ReceiveWorker {
                reader,
                codec: Arc::clone(&self.codec),
                inbound: self.inbound.clone(),
                read_timeout: self.settings.read_timeout(),
            },
        ) {
            Ok(handle) => handle,
            Err(e) => {
                send_worker.request_stop();
                queue.close();
                send_worker.join(self.settings.join_timeout());
                return Err(e.into());
            }
        };

        let timeout = self.settings.join_timeout();
        if !send_worker.wait_started(timeout) || !receive_worker.wait_started(timeout) {
            warn!("Workers slow to start; continuing");
        }

        Ok(Session {
            queue,
            send_worker,
            receive_worker,
        })
    }

    /// Stop both workers and release the device
    ///
    /// Never fails and never blocks longer than the join timeout per worker.
    /// Calling it again, or before `start`, does nothing.
    pub fn stop(&mut self) -> ShutdownReport {
        let Some(session) = self.session.take() else {
            debug!("Stop requested while idle");
            self.state = ControllerState::Idle;
            return ShutdownReport::default();
        };
        self.state = ControllerState::Stopping;

        session.send_worker.request_stop();
        session.receive_worker.request_stop();
        session.queue.close();

        let timeout = self.settings.join_timeout();
        let send_report = session.send_worker.join(timeout);
        let receive_report = session.receive_worker.join(timeout);

        for report in [&send_report, &receive_report] {
            if !report.joined {
                warn!(
                    "{} still running after {:?}, releasing device anyway",
                    report.name, timeout
                );
            } else if report.snapshot.fatal {
                if let Some(e) = &report.snapshot.last_error {
                    warn!("{} had stopped on failure: {}", report.name, e);
                }
            }
        }
        let evicted = session.queue.evicted();
        if evicted > 0 {
            warn!("{} outbound frame(s) were evicted from a full queue", evicted);
        }
        if send_report.snapshot.dropped > 0 {
            warn!(
                "{} outbound frame(s) were not sent",
                send_report.snapshot.dropped
            );
        }

        let mut released = false;
        if let Some(device) = self.device.take() {
            released = device.is_claimed();
            device.release();
            info!("Released KNX USB device {}", device.info());
        }

        self.state = ControllerState::Idle;
        ShutdownReport {
            send_worker: Some(send_report),
            receive_worker: Some(receive_report),
            released,
            evicted,
        }
    }

    /// Claim the selected device without touching the workers
    ///
    /// Returns `Ok(true)` when a new claim was made and `Ok(false)` when the
    /// device was already claimed.
    pub fn connect(&self) -> Result<bool> {
        let device = self.device.as_ref().ok_or(TransportError::NoDeviceSelected)?;
        match device.claim() {
            Ok(()) => {
                debug!("Connected to {}", device.info().identifier());
                Ok(true)
            }
            Err(TransportError::AlreadyClaimed) => {
                debug!("{} already claimed", device.info().identifier());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release the selected device's claim without touching the workers
    ///
    /// While released the receive worker idles and resumes reading after
    /// [`connect`](Self::connect); frames sent meanwhile fail to write and
    /// are lost.
    pub fn disconnect(&self) {
        match &self.device {
            Some(device) => {
                device.release();
                debug!("Disconnected from {}", device.info().identifier());
            }
            None => debug!("Disconnect requested with no device selected"),
        }
    }

    /// Queue a frame for the send worker
    ///
    /// Accepting a frame does not mean it was transmitted.
    pub fn send(&self, frame: Frame) -> Result<()> {
        debug!("sending: {:?}", frame);
        self.session
            .as_ref()
            .ok_or(TransportError::NotStarted)?
            .queue
            .push(frame)
    }

    /// Producer handle for the current session's queue
    pub fn sender(&self) -> Result<FrameSender> {
        self.session
            .as_ref()
            .map(|session| session.queue.sender())
            .ok_or(TransportError::NotStarted)
    }

    pub fn health(&self) -> TransportHealth {
        let session = self.session.as_ref();
        TransportHealth {
            state: self.state,
            device: self.device_info().cloned(),
            claimed: self.device.as_ref().is_some_and(|d| d.is_claimed()),
            queued: session.map_or(0, |s| s.queue.len()),
            evicted: session.map_or(0, |s| s.queue.evicted()),
            send_worker: session.map(|s| s.send_worker.status().snapshot()),
            receive_worker: session.map(|s| s.receive_worker.status().snapshot()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health().is_healthy()
    }
}

impl<L: DeviceLocator, C: FrameCodec> Drop for TransportController<L, C> {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.stop();
        }
    }
}
