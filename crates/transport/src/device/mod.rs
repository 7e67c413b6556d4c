//! USB device abstraction
//!
//! [`UsbDevice`] is the contract the transport needs from one physical
//! interface: an exclusive claim, its release, and raw read/write transfers.
//! The libusb-backed implementation lives in [`libusb`]; tests substitute
//! [`crate::test_utils::FakeDevice`].
//!
//! Workers never see the device itself. The controller keeps it in an `Arc`
//! and hands out one [`ReadHalf`] and one [`WriteHalf`], neither of which can
//! be cloned, claim, or release.

pub mod libusb;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default interrupt report size of KNX USB interfaces
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64;

/// Vendor/product pair selecting eligible devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentifier {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Descriptor of a discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    pub fn identifier(&self) -> DeviceIdentifier {
        DeviceIdentifier::new(self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {}",
            self.bus_number,
            self.device_address,
            self.identifier()
        )?;
        let names: Vec<&str> = [&self.manufacturer, &self.product]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .collect();
        if !names.is_empty() {
            write!(f, " {}", names.join(" "))?;
        }
        if let Some(serial) = &self.serial_number {
            write!(f, " (serial {})", serial)?;
        }
        Ok(())
    }
}

/// One physical KNX USB interface
///
/// At most one claim is live at a time: `claim` on a claimed device fails
/// with [`crate::TransportError::AlreadyClaimed`], while `release` on an
/// unclaimed device does nothing. `read` and `write` must tolerate being
/// called concurrently from one reader thread and one writer thread.
pub trait UsbDevice: Send + Sync + 'static {
    /// Descriptor captured at discovery
    fn info(&self) -> &DeviceInfo;

    /// Claim the interface and set up the read/write endpoints
    fn claim(&self) -> Result<()>;

    /// Relinquish the claim
    fn release(&self);

    fn is_claimed(&self) -> bool;

    /// Write one report to the OUT endpoint, returning bytes written
    fn write(&self, data: &[u8], timeout: Duration) -> std::result::Result<usize, rusb::Error>;

    /// Read one report from the IN endpoint, returning bytes read
    ///
    /// `rusb::Error::Timeout` means no data arrived in time.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, rusb::Error>;

    /// Size of the read buffer the receive worker allocates
    fn max_packet_size(&self) -> usize {
        DEFAULT_MAX_PACKET_SIZE
    }
}

/// How a worker should react to a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// Nothing arrived before the timeout
    Timeout,
    /// Worth retrying on the next iteration
    Transient,
    /// The device is gone or unusable
    Fatal,
}

impl TransferFailure {
    pub fn classify(error: rusb::Error) -> Self {
        match error {
            rusb::Error::Timeout => TransferFailure::Timeout,
            rusb::Error::Interrupted | rusb::Error::Overflow | rusb::Error::Pipe => {
                TransferFailure::Transient
            }
            _ => TransferFailure::Fatal,
        }
    }
}

/// Read-only view of a claimed device, owned by the receive worker
pub struct ReadHalf<D: UsbDevice> {
    device: Arc<D>,
}

impl<D: UsbDevice> ReadHalf<D> {
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        self.device.read(buf, timeout)
    }

    pub fn max_packet_size(&self) -> usize {
        self.device.max_packet_size()
    }

    /// Whether the owner currently holds the claim
    pub fn is_claimed(&self) -> bool {
        self.device.is_claimed()
    }
}

/// Write-only view of a claimed device, owned by the send worker
pub struct WriteHalf<D: UsbDevice> {
    device: Arc<D>,
}

impl<D: UsbDevice> WriteHalf<D> {
    pub fn write(&self, data: &[u8], timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        self.device.write(data, timeout)
    }
}

/// Hand out the single reader and single writer for a device
pub(crate) fn split<D: UsbDevice>(device: &Arc<D>) -> (ReadHalf<D>, WriteHalf<D>) {
    (
        ReadHalf {
            device: Arc::clone(device),
        },
        WriteHalf {
            device: Arc::clone(device),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x0e77,
            product_id: 0x0104,
            bus_number: 1,
            device_address: 7,
            manufacturer: Some("Weinzierl".to_string()),
            product: Some("KNX-USB Interface".to_string()),
            serial_number: None,
        }
    }

    #[test]
    fn test_identifier_display() {
        assert_eq!(DeviceIdentifier::new(0x1234, 0x5678).to_string(), "1234:5678");
        assert_eq!(DeviceIdentifier::new(0x0e77, 0x0104).to_string(), "0e77:0104");
    }

    #[test]
    fn test_device_info_display() {
        let text = info().to_string();
        assert_eq!(
            text,
            "Bus 001 Device 007: ID 0e77:0104 Weinzierl KNX-USB Interface"
        );
    }

    #[test]
    fn test_classify_transfer_errors() {
        assert_eq!(
            TransferFailure::classify(rusb::Error::Timeout),
            TransferFailure::Timeout
        );
        assert_eq!(
            TransferFailure::classify(rusb::Error::Pipe),
            TransferFailure::Transient
        );
        assert_eq!(
            TransferFailure::classify(rusb::Error::NoDevice),
            TransferFailure::Fatal
        );
        assert_eq!(
            TransferFailure::classify(rusb::Error::Io),
            TransferFailure::Fatal
        );
    }
}
