//! Receive worker: device -> inbound sink

use super::{StopSignal, WorkerError, WorkerLoop, WorkerStatus};
use crate::device::{ReadHalf, TransferFailure, UsbDevice};
use crate::frame::{Frame, FrameCodec};
use async_channel::{Sender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Reads reports from the device and forwards decoded frames
///
/// The read timeout bounds how long a stop request can go unnoticed.
pub(crate) struct ReceiveWorker<D: UsbDevice, C: FrameCodec> {
    pub(crate) reader: ReadHalf<D>,
    pub(crate) codec: Arc<C>,
    pub(crate) inbound: Sender<Frame>,
    pub(crate) read_timeout: Duration,
}

enum Forwarded {
    Delivered,
    Dropped,
    SinkClosed,
}

impl<D: UsbDevice, C: FrameCodec> ReceiveWorker<D, C> {
    /// Hand a frame to the sink without ever blocking on it
    fn forward(&self, frame: Frame) -> Forwarded {
        match self.inbound.try_send(frame) {
            Ok(()) => Forwarded::Delivered,
            Err(TrySendError::Full(frame)) => {
                warn!("Inbound sink full, dropping {:?}", frame);
                Forwarded::Dropped
            }
            Err(TrySendError::Closed(_)) => Forwarded::SinkClosed,
        }
    }
}

impl<D: UsbDevice, C: FrameCodec> WorkerLoop for ReceiveWorker<D, C> {
    fn run(self, stop: &StopSignal, status: &WorkerStatus) {
        let mut buf = vec![0u8; self.reader.max_packet_size()];
        let mut released = false;

        while !stop.is_requested() {
            // The owner may release and re-claim the device while we run
            if !self.reader.is_claimed() {
                if !released {
                    debug!("Device released, waiting for a new claim");
                    released = true;
                }
                std::thread::sleep(self.read_timeout);
                continue;
            }
            if released {
                debug!("Device claimed again, resuming reads");
                released = false;
            }

            let len = match self.reader.read(&mut buf, self.read_timeout) {
                Ok(0) => continue,
                Ok(len) => len,
                Err(e) => match TransferFailure::classify(e) {
                    TransferFailure::Timeout => continue,
                    TransferFailure::Fatal if !self.reader.is_claimed() => {
                        debug!("Read ended by release: {}", e);
                        continue;
                    }
                    TransferFailure::Transient => {
                        warn!("Transient read error: {}", e);
                        status.record_error(WorkerError::Transfer(e));
                        continue;
                    }
                    TransferFailure::Fatal => {
                        error!("Read failed, receive worker exiting: {}", e);
                        status.record_fatal(WorkerError::Transfer(e));
                        return;
                    }
                },
            };

            let frame = match self.codec.decode(&buf[..len]) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    trace!("{} byte read did not complete a frame", len);
                    continue;
                }
                Err(e) => {
                    warn!("Discarding undecodable read of {} bytes: {}", len, e);
                    status.record_error(WorkerError::Codec(e));
                    continue;
                }
            };

            trace!("Received {:?}", frame);
            match self.forward(frame) {
                Forwarded::Delivered => status.record_frame(),
                Forwarded::Dropped => status.record_dropped(1),
                Forwarded::SinkClosed => {
                    error!("Inbound sink closed, receive worker exiting");
                    status.record_fatal(WorkerError::InboundClosed);
                    return;
                }
            }
        }

        debug!("Receive worker observed stop request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::split;
    use crate::frame::RawFrameCodec;
    use crate::test_utils::FakeDevice;
    use crate::worker::{WorkerHandle, WorkerState};
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, wait_until};

    fn spawn(device: &FakeDevice, inbound: Sender<Frame>) -> WorkerHandle {
        let device = Arc::new(device.clone());
        device.claim().unwrap();
        let (reader, _writer) = split(&device);

        let worker = ReceiveWorker {
            reader,
            codec: Arc::new(RawFrameCodec),
            inbound,
            read_timeout: Duration::from_millis(10),
        };
        WorkerHandle::spawn("test-receive", worker).unwrap()
    }

    #[test]
    fn test_forwards_reads_in_order() {
        let device = FakeDevice::new(0x1234, 0x5678);
        device.push_read(vec![0x29, 0x00]);
        device.push_read(vec![0x29, 0x01]);
        let (tx, rx) = async_channel::unbounded();

        let handle = spawn(&device, tx);
        let first = rx.recv_blocking().unwrap();
        let second = rx.recv_blocking().unwrap();
        assert_eq!(first.as_bytes(), &[0x29, 0x00]);
        assert_eq!(second.as_bytes(), &[0x29, 0x01]);

        handle.request_stop();
        let report = handle.join(DEFAULT_TEST_TIMEOUT);
        assert!(report.joined);
        assert_eq!(report.snapshot.frames, 2);
        assert!(report.snapshot.last_error.is_none());
    }

    #[test]
    fn test_hard_error_stops_worker() {
        let device = FakeDevice::new(0x1234, 0x5678);
        device.push_read_error(rusb::Error::NoDevice);
        let (tx, _rx) = async_channel::unbounded();

        let handle = spawn(&device, tx);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            handle.status().state() == WorkerState::Stopped
        }));

        let snapshot = handle.status().snapshot();
        assert!(snapshot.fatal);
        assert_eq!(
            snapshot.last_error,
            Some(WorkerError::Transfer(rusb::Error::NoDevice))
        );
    }

    #[test]
    fn test_transient_error_keeps_reading() {
        let device = FakeDevice::new(0x1234, 0x5678);
        device.push_read_error(rusb::Error::Overflow);
        device.push_read(vec![0x11]);
        let (tx, rx) = async_channel::unbounded();

        let handle = spawn(&device, tx);
        assert_eq!(rx.recv_blocking().unwrap().as_bytes(), &[0x11]);

        handle.request_stop();
        let report = handle.join(DEFAULT_TEST_TIMEOUT);
        assert!(!report.snapshot.fatal);
        assert_eq!(report.snapshot.errors, 1);
        assert_eq!(report.snapshot.frames, 1);
    }

    #[test]
    fn test_full_sink_drops_without_blocking() {
        let device = FakeDevice::new(0x1234, 0x5678);
        for n in 0..3u8 {
            device.push_read(vec![n]);
        }
        let (tx, rx) = async_channel::bounded(1);

        let handle = spawn(&device, tx);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            handle.status().snapshot().dropped == 2
        }));

        handle.request_stop();
        assert!(handle.join(DEFAULT_TEST_TIMEOUT).joined);
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[0]);
    }

    #[test]
    fn test_release_pauses_reads_until_reclaimed() {
        let device = FakeDevice::new(0x1234, 0x5678);
        let (tx, rx) = async_channel::unbounded();

        let handle = spawn(&device, tx);
        device.release();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.status().state(), WorkerState::Running);

        device.claim().unwrap();
        device.push_read(vec![0x29, 0x02]);
        assert_eq!(rx.recv_blocking().unwrap().as_bytes(), &[0x29, 0x02]);

        handle.request_stop();
        let report = handle.join(DEFAULT_TEST_TIMEOUT);
        assert!(report.joined);
        assert!(!report.snapshot.fatal);
        assert!(report.snapshot.last_error.is_none());
    }

    #[test]
    fn test_closed_sink_stops_worker() {
        let device = FakeDevice::new(0x1234, 0x5678);
        device.push_read(vec![0x01]);
        let (tx, rx) = async_channel::unbounded::<Frame>();
        drop(rx);

        let handle = spawn(&device, tx);
        let report = handle.join(DEFAULT_TEST_TIMEOUT);
        assert!(report.joined);
        assert_eq!(report.snapshot.last_error, Some(WorkerError::InboundClosed));
    }
}
