//! Outbound frame queue
//!
//! Multi-producer, single-consumer FIFO between `send` callers and the send
//! worker. Each controller session creates a fresh queue; closing it at stop
//! wakes a send worker blocked on an empty queue.

use crate::error::{Result, TransportError};
use crate::frame::Frame;
use crate::settings::{OverflowPolicy, QueueSettings};
use async_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// The queue owned by the controller for one session
pub(crate) struct OutboundQueue {
    sender: FrameSender,
    receiver: Receiver<Frame>,
}

impl OutboundQueue {
    pub(crate) fn new(settings: &QueueSettings) -> Self {
        let (tx, rx) = match settings.capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };

        Self {
            sender: FrameSender {
                tx,
                rx: rx.clone(),
                overflow: settings.overflow,
                evicted: Arc::new(AtomicU64::new(0)),
            },
            receiver: rx,
        }
    }

    pub(crate) fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// The consumer end for the send worker
    pub(crate) fn receiver(&self) -> Receiver<Frame> {
        self.receiver.clone()
    }

    pub(crate) fn push(&self, frame: Frame) -> Result<()> {
        self.sender.send(frame)
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Frames evicted under [`OverflowPolicy::DropOldest`] so far
    pub(crate) fn evicted(&self) -> u64 {
        self.sender.evicted()
    }

    /// Refuse further frames; already queued frames stay receivable
    pub(crate) fn close(&self) {
        self.sender.tx.close();
    }
}

/// Cloneable producer handle onto a session's outbound queue
///
/// Fails with [`TransportError::QueueClosed`] once that session stops.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
    /// Used only to evict the head under [`OverflowPolicy::DropOldest`]
    rx: Receiver<Frame>,
    overflow: OverflowPolicy,
    /// Shared by every clone of the session's sender
    evicted: Arc<AtomicU64>,
}

impl FrameSender {
    /// Enqueue a frame according to the overflow policy
    ///
    /// Never waits on device I/O; only [`OverflowPolicy::Block`] on a full
    /// bounded queue waits, and then only for queue space.
    pub fn send(&self, frame: Frame) -> Result<()> {
        trace!("Queueing {:?}", frame);

        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(TransportError::QueueClosed),
                Err(TrySendError::Full(rejected)) => match self.overflow {
                    OverflowPolicy::Reject => {
                        return Err(TransportError::QueueFull {
                            capacity: self.capacity(),
                        });
                    }
                    OverflowPolicy::Block => {
                        return self
                            .tx
                            .send_blocking(rejected)
                            .map_err(|_| TransportError::QueueClosed);
                    }
                    OverflowPolicy::DropOldest => {
                        if let Ok(evicted) = self.rx.try_recv() {
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                            warn!("Outbound queue full, dropping oldest {:?}", evicted);
                        }
                        frame = rejected;
                    }
                },
            }
        }
    }

    /// Frames currently waiting
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Frames this session's queue has evicted to make room
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}
