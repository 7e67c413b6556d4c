//! Test doubles for the device and locator collaborators
//!
//! [`FakeDevice`] records claims, releases, and written payloads, and serves
//! scripted reads. Clones share state, so a test can keep one clone while
//! the controller owns another.
//!
//! # Example
//!
//! ```
//! use transport::test_utils::{FakeDevice, FakeLocator};
//! use transport::{DeviceIdentifier, DeviceLocator};
//!
//! let device = FakeDevice::new(0x1234, 0x5678);
//! let locator = FakeLocator::new(vec![device.clone()]);
//!
//! let found = locator.find_devices(DeviceIdentifier::new(0x1234, 0x5678)).unwrap();
//! assert_eq!(found.len(), 1);
//! ```

use crate::device::{DeviceIdentifier, DeviceInfo, UsbDevice};
use crate::error::{Result, TransportError};
use crate::locator::DeviceLocator;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Create a DeviceInfo for testing
pub fn create_mock_device_info(vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        vendor_id,
        product_id,
        bus_number: 1,
        device_address: 4,
        manufacturer: Some("Test Manufacturer".to_string()),
        product: Some("Test KNX USB Interface".to_string()),
        serial_number: Some("SN000001".to_string()),
    }
}

#[derive(Default)]
struct FakeState {
    claimed: bool,
    claims: usize,
    releases: usize,
    claim_error: Option<rusb::Error>,
    writes: Vec<Vec<u8>>,
    write_failures: VecDeque<rusb::Error>,
    write_delay: Duration,
    reads: VecDeque<std::result::Result<Vec<u8>, rusb::Error>>,
}

struct FakeInner {
    info: DeviceInfo,
    state: Mutex<FakeState>,
    readable: Condvar,
}

/// In-memory stand-in for a KNX USB interface
#[derive(Clone)]
pub struct FakeDevice {
    inner: Arc<FakeInner>,
}

impl FakeDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self::with_info(create_mock_device_info(vendor_id, product_id))
    }

    pub fn with_info(info: DeviceInfo) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                info,
                state: Mutex::new(FakeState::default()),
                readable: Condvar::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Successful claims so far
    pub fn claims(&self) -> usize {
        self.state().claims
    }

    /// Releases of a live claim so far
    pub fn releases(&self) -> usize {
        self.state().releases
    }

    /// Payloads of successful writes, in write order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Make future claims fail with `error`, or succeed again with `None`
    pub fn set_claim_error(&self, error: Option<rusb::Error>) {
        self.state().claim_error = error;
    }

    /// Fail the next writes with these errors, one per write
    pub fn fail_writes(&self, errors: impl IntoIterator<Item = rusb::Error>) {
        self.state().write_failures.extend(errors);
    }

    /// Delay every write by `delay`
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    /// Queue a report for the next read
    pub fn push_read(&self, data: Vec<u8>) {
        self.state().reads.push_back(Ok(data));
        self.inner.readable.notify_all();
    }

    /// Queue a read failure
    pub fn push_read_error(&self, error: rusb::Error) {
        self.state().reads.push_back(Err(error));
        self.inner.readable.notify_all();
    }
}

impl UsbDevice for FakeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    fn claim(&self) -> Result<()> {
        let mut state = self.state();
        if state.claimed {
            return Err(TransportError::AlreadyClaimed);
        }
        if let Some(source) = state.claim_error {
            return Err(TransportError::Claim {
                interface: 0,
                source,
            });
        }
        state.claimed = true;
        state.claims += 1;
        Ok(())
    }

    fn release(&self) {
        let mut state = self.state();
        if state.claimed {
            state.claimed = false;
            state.releases += 1;
            self.inner.readable.notify_all();
        }
    }

    fn is_claimed(&self) -> bool {
        self.state().claimed
    }

    fn write(&self, data: &[u8], _timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        let delay = self.state().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        if !state.claimed {
            return Err(rusb::Error::NoDevice);
        }
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, rusb::Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if !state.claimed {
                return Err(rusb::Error::NoDevice);
            }
            match state.reads.pop_front() {
                Some(Ok(data)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    return Ok(len);
                }
                Some(Err(error)) => return Err(error),
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(rusb::Error::Timeout);
            }
            state = self
                .inner
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Locator serving a fixed set of fake devices
pub struct FakeLocator {
    devices: Vec<FakeDevice>,
    error: Option<rusb::Error>,
    calls: AtomicUsize,
}

impl FakeLocator {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A locator whose enumeration always fails with `error`
    pub fn failing(error: rusb::Error) -> Self {
        Self {
            devices: Vec::new(),
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `find_devices` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeviceLocator for FakeLocator {
    type Device = FakeDevice;

    fn find_devices(&self, identifier: DeviceIdentifier) -> Result<Vec<FakeDevice>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.error {
            return Err(TransportError::DeviceEnumeration(error));
        }
        Ok(self
            .devices
            .iter()
            .filter(|device| device.info().identifier() == identifier)
            .cloned()
            .collect())
    }
}
