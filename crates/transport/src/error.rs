//! Transport error types

use thiserror::Error;

/// Errors reported synchronously by the transport
///
/// Failures inside the worker loops are not returned here; they are
/// recorded on the worker status as [`crate::worker::WorkerError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// No attached device matched the identifier at start time
    #[error(
        "Could not find a KNX USB device (idVendor: {vendor_id:#06x}, idProduct: {product_id:#06x})"
    )]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// `start()` called while already started
    #[error("Transport already started")]
    AlreadyStarted,

    /// `connect()` called before a device was selected
    #[error("No USB device selected")]
    NoDeviceSelected,

    /// `send()` called while the transport is not started
    #[error("Transport not started")]
    NotStarted,

    /// The OS/driver enumeration layer failed
    #[error("USB device enumeration failed: {0}")]
    DeviceEnumeration(#[source] rusb::Error),

    /// Opening the device or claiming its interface failed
    #[error("Failed to claim USB interface {interface}: {source}")]
    Claim {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    /// The device is already claimed by this handle
    #[error("USB interface already claimed")]
    AlreadyClaimed,

    /// The outbound queue is bounded and full under the reject policy
    #[error("Outbound queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The outbound queue belongs to a stopped session
    #[error("Outbound queue closed")]
    QueueClosed,

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Settings failed validation
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Type alias for transport results
pub type Result<T> = std::result::Result<T, TransportError>;
