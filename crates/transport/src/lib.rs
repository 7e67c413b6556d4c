//! CEMI frame transport over KNX USB interfaces
//!
//! The lowest layer of a KNX stack: callers see "send a frame" and "frames
//! arrive", while this crate owns the USB device lifecycle and the two
//! worker threads that overlap sending and receiving.
//!
//! ```no_run
//! use transport::{DeviceIdentifier, Frame, LibUsbLocator, TransportController};
//!
//! # fn main() -> transport::Result<()> {
//! let (inbound_tx, inbound_rx) = async_channel::bounded(256);
//! let locator = LibUsbLocator::new()?;
//! let mut controller =
//!     TransportController::new(DeviceIdentifier::new(0x0e77, 0x0104), locator, inbound_tx);
//!
//! controller.start()?;
//! controller.send(Frame::from(vec![0x11, 0x00, 0xbc, 0xe0]))?;
//! if let Ok(frame) = inbound_rx.recv_blocking() {
//!     println!("received {}", frame);
//! }
//! let report = controller.stop();
//! assert!(report.all_joined());
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod device;
pub mod error;
pub mod frame;
pub mod locator;
pub mod queue;
pub mod settings;
pub mod test_utils;
pub mod worker;

pub use controller::{ControllerState, ShutdownReport, TransportController, TransportHealth};
pub use device::libusb::LibUsbDevice;
pub use device::{DeviceIdentifier, DeviceInfo, UsbDevice};
pub use error::{Result, TransportError};
pub use frame::{CodecError, Frame, FrameCodec, RawFrameCodec};
pub use locator::{DeviceLocator, LibUsbLocator};
pub use queue::FrameSender;
pub use settings::{OverflowPolicy, QueueSettings, TransportSettings};
pub use worker::{WorkerError, WorkerReport, WorkerSnapshot, WorkerState};
