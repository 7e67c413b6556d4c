//! libusb-backed KNX USB device
//!
//! KNX USB interfaces are HID-class devices exchanging fixed-size reports
//! over one interrupt IN and one interrupt OUT endpoint. A device qualifies
//! only if its active configuration exposes such an interface.

use super::{DeviceInfo, UsbDevice};
use crate::error::{Result, TransportError};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// USB interface class code for HID
pub const HID_CLASS: u8 = 0x03;

/// Endpoints of the KNX interface on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxEndpoints {
    pub interface: u8,
    pub in_address: u8,
    pub out_address: u8,
    pub max_packet_size: u16,
}

/// Look for a HID interface with interrupt IN and OUT endpoints
///
/// Returns `None` when the device does not carry the KNX USB signature or
/// its configuration cannot be read.
pub fn find_knx_endpoints(device: &Device<Context>) -> Option<KnxEndpoints> {
    let config = match device.active_config_descriptor() {
        Ok(config) => config,
        Err(e) => {
            debug!(
                "Could not read config descriptor for bus={}, addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            return None;
        }
    };

    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            if setting.class_code() != HID_CLASS {
                continue;
            }

            let mut in_ep = None;
            let mut out_ep = None;
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Interrupt {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if in_ep.is_none() => in_ep = Some(endpoint),
                    Direction::Out if out_ep.is_none() => out_ep = Some(endpoint),
                    _ => {}
                }
            }

            if let (Some(in_ep), Some(out_ep)) = (in_ep, out_ep) {
                return Some(KnxEndpoints {
                    interface: setting.interface_number(),
                    in_address: in_ep.address(),
                    out_address: out_ep.address(),
                    max_packet_size: in_ep.max_packet_size(),
                });
            }
        }
    }

    None
}

/// Build a [`DeviceInfo`], reading string descriptors when the device opens
pub fn describe(device: &Device<Context>, descriptor: &DeviceDescriptor) -> DeviceInfo {
    let strings = device.open().ok().map(|handle| {
        let read = |index: Option<u8>| {
            index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        };
        (
            read(descriptor.manufacturer_string_index()),
            read(descriptor.product_string_index()),
            read(descriptor.serial_number_string_index()),
        )
    });
    let (manufacturer, product, serial_number) = strings.unwrap_or((None, None, None));

    DeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        device_address: device.address(),
        manufacturer,
        product,
        serial_number,
    }
}

/// A KNX USB interface accessed through libusb
pub struct LibUsbDevice {
    device: Device<Context>,
    info: DeviceInfo,
    endpoints: KnxEndpoints,
    /// Present while claimed; transfers run on a clone outside the lock
    handle: RwLock<Option<Arc<DeviceHandle<Context>>>>,
    /// Whether claim detached a kernel driver that release must restore
    kernel_driver_detached: AtomicBool,
}

impl LibUsbDevice {
    pub fn new(device: Device<Context>, info: DeviceInfo, endpoints: KnxEndpoints) -> Self {
        Self {
            device,
            info,
            endpoints,
            handle: RwLock::new(None),
            kernel_driver_detached: AtomicBool::new(false),
        }
    }

    pub fn endpoints(&self) -> KnxEndpoints {
        self.endpoints
    }

    /// Clone the live handle so a transfer never holds the lock
    ///
    /// A release during the transfer only drops the slot's reference; the
    /// handle closes once the in-flight transfer returns.
    fn transfer_handle(&self) -> std::result::Result<Arc<DeviceHandle<Context>>, rusb::Error> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(rusb::Error::NoDevice)
    }

    fn claim_error(&self, source: rusb::Error) -> TransportError {
        TransportError::Claim {
            interface: self.endpoints.interface,
            source,
        }
    }
}

impl UsbDevice for LibUsbDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn claim(&self) -> Result<()> {
        let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(TransportError::AlreadyClaimed);
        }

        let interface = self.endpoints.interface;
        let handle = self.device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", self.info, e);
            self.claim_error(e)
        })?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on {}",
                    interface,
                    self.info.identifier()
                );
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => self.kernel_driver_detached.store(true, Ordering::SeqCst),
                    // Claiming below reports the real failure
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    ),
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        if let Err(e) = handle.claim_interface(interface) {
            warn!("Failed to claim interface {}: {}", interface, e);
            if self.kernel_driver_detached.swap(false, Ordering::SeqCst) {
                if let Err(e) = handle.attach_kernel_driver(interface) {
                    debug!(
                        "Could not reattach kernel driver to interface {}: {}",
                        interface, e
                    );
                }
            }
            return Err(self.claim_error(e));
        }

        debug!(
            "Claimed interface {} on {} (in={:#04x}, out={:#04x})",
            interface,
            self.info.identifier(),
            self.endpoints.in_address,
            self.endpoints.out_address
        );
        *slot = Some(Arc::new(handle));
        Ok(())
    }

    fn release(&self) {
        let taken = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = taken else {
            return;
        };

        let interface = self.endpoints.interface;
        if let Err(e) = handle.release_interface(interface) {
            warn!("Failed to release interface {}: {}", interface, e);
        }

        if self.kernel_driver_detached.swap(false, Ordering::SeqCst) {
            match handle.attach_kernel_driver(interface) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", interface),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                ),
            }
        }

        debug!("Released interface {} on {}", interface, self.info.identifier());
    }

    fn is_claimed(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn write(&self, data: &[u8], timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        let handle = self.transfer_handle()?;
        handle.write_interrupt(self.endpoints.out_address, data, timeout)
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        let handle = self.transfer_handle()?;
        handle.read_interrupt(self.endpoints.in_address, buf, timeout)
    }

    fn max_packet_size(&self) -> usize {
        usize::from(self.endpoints.max_packet_size).max(1)
    }
}

impl Drop for LibUsbDevice {
    fn drop(&mut self) {
        self.release();
    }
}
