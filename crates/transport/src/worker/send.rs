//! Send worker: outbound queue -> device

use super::{StopSignal, WorkerError, WorkerLoop, WorkerStatus};
use crate::device::{UsbDevice, WriteHalf};
use crate::frame::{Frame, FrameCodec};
use async_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Writes queued frames to the device one at a time, in queue order
pub(crate) struct SendWorker<D: UsbDevice, C: FrameCodec> {
    pub(crate) writer: WriteHalf<D>,
    pub(crate) codec: Arc<C>,
    pub(crate) outbound: Receiver<Frame>,
    pub(crate) write_timeout: Duration,
}

impl<D: UsbDevice, C: FrameCodec> SendWorker<D, C> {
    fn write_frame(&self, frame: &Frame, status: &WorkerStatus) {
        let data = match self.codec.encode(frame) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping unencodable {:?}: {}", frame, e);
                status.record_error(WorkerError::Codec(e));
                return;
            }
        };

        match self.writer.write(&data, self.write_timeout) {
            Ok(written) if written < data.len() => {
                warn!("Short write: {} of {} bytes for {:?}", written, data.len(), frame);
                status.record_error(WorkerError::Transfer(rusb::Error::Io));
            }
            Ok(_) => {
                trace!("Wrote {:?}", frame);
                status.record_frame();
            }
            Err(e) => {
                // Keep going: the next frame may succeed once the device recovers
                warn!("Failed to write {:?}: {}", frame, e);
                status.record_error(WorkerError::Transfer(e));
            }
        }
    }
}

impl<D: UsbDevice, C: FrameCodec> WorkerLoop for SendWorker<D, C> {
    fn run(self, stop: &StopSignal, status: &WorkerStatus) {
        // The controller closes the queue when it requests a stop, so this
        // wakes up even when nothing is queued.
        while let Ok(frame) = self.outbound.recv_blocking() {
            if stop.is_requested() {
                let abandoned = 1 + self.outbound.len() as u64;
                warn!("Stop requested, abandoning {} queued frame(s)", abandoned);
                status.record_dropped(abandoned);
                return;
            }
            self.write_frame(&frame, status);
        }

        debug!("Outbound queue closed and empty");
    }
}
