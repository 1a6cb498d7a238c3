//! In-memory HID host for exercising discovery, the battery exchange and the listener without
//! hardware.
//!
//! Devices can be plugged and unplugged at any time and made to fail individual operations. The
//! host counts enumerations, opens and live handles so tests can check that every handle is
//! released and that no two exchanges overlap.

use crate::catalog::UsbId;
use crate::hid::{DeviceError, DevicePath, HidDevice, HidHost, ReportLengths};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A simulated HID interface.
#[derive(Clone, Debug)]
pub struct MockDevice {
    path: DevicePath,
    id: UsbId,
    reports: ReportLengths,
    response: Vec<u8>,
    fail_open: bool,
    fail_attributes: bool,
    fail_capabilities: bool,
    fail_write: bool,
    fail_read: bool,
}

impl MockDevice {
    /// A healthy device that answers every read with an all-zero input report.
    pub fn new(path: DevicePath, id: UsbId, reports: ReportLengths) -> Self {
        Self {
            path,
            id,
            reports,
            response: vec![0u8; reports.input as usize],
            fail_open: false,
            fail_attributes: false,
            fail_capabilities: false,
            fail_write: false,
            fail_read: false,
        }
    }

    /// Bytes returned by each read. May be shorter than the input report to simulate short reads.
    pub fn with_response(mut self, response: Vec<u8>) -> Self {
        self.response = response;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_attributes(mut self) -> Self {
        self.fail_attributes = true;
        self
    }

    pub fn failing_capabilities(mut self) -> Self {
        self.fail_capabilities = true;
        self
    }

    pub fn failing_write(mut self) -> Self {
        self.fail_write = true;
        self
    }

    pub fn failing_read(mut self) -> Self {
        self.fail_read = true;
        self
    }
}

#[derive(Default)]
struct State {
    devices: Vec<MockDevice>,
    fail_enumeration: bool,
    enumerations: usize,
    opened: HashMap<DevicePath, usize>,
    written: HashMap<DevicePath, Vec<Vec<u8>>>,
    open_handles: usize,
    max_open_handles: usize,
}

impl State {
    fn device(&self, path: &DevicePath) -> Result<&MockDevice, DeviceError> {
        self.devices
            .iter()
            .find(|d| &d.path == path)
            .ok_or(DeviceError::Disconnected)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn io_error(what: &str) -> DeviceError {
    DeviceError::Hid(hidapi::HidError::HidApiError {
        message: format!("simulated {what} failure"),
    })
}

/// Clones share the same simulated bus.
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<State>>,
}

impl MockHost {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let host = Self::default();
        lock(&host.state).devices = devices;
        host
    }

    /// Attach a device at the end of the enumeration order.
    pub fn plug(&self, device: MockDevice) {
        lock(&self.state).devices.push(device);
    }

    /// Detach a device. Handles already open to it start failing.
    pub fn unplug(&self, path: &str) {
        lock(&self.state).devices.retain(|d| !is_path(&d.path, path));
    }

    /// Make enumeration itself fail (or succeed again).
    pub fn fail_enumeration(&self, fail: bool) {
        lock(&self.state).fail_enumeration = fail;
    }

    /// Make writes to the device at `path` fail (or succeed again) without unplugging it.
    pub fn fail_writes(&self, path: &str, fail: bool) {
        for device in lock(&self.state).devices.iter_mut() {
            if is_path(&device.path, path) {
                device.fail_write = fail;
            }
        }
    }

    pub fn set_response(&self, path: &str, response: Vec<u8>) {
        for device in lock(&self.state).devices.iter_mut() {
            if is_path(&device.path, path) {
                device.response = response.clone();
            }
        }
    }

    /// Number of enumeration passes started so far.
    pub fn enumerations(&self) -> usize {
        lock(&self.state).enumerations
    }

    /// Number of times the device at `path` has been successfully opened.
    pub fn opened(&self, path: &str) -> usize {
        lock(&self.state)
            .opened
            .iter()
            .filter(|(p, _)| is_path(p, path))
            .map(|(_, &n)| n)
            .sum()
    }

    /// Every output report written to the device at `path`, oldest first.
    pub fn written(&self, path: &str) -> Vec<Vec<u8>> {
        lock(&self.state)
            .written
            .iter()
            .filter(|(p, _)| is_path(p, path))
            .flat_map(|(_, reports)| reports.clone())
            .collect()
    }

    /// Handles currently open across all devices.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    /// The most handles that were ever open at the same time.
    pub fn max_open_handles(&self) -> usize {
        lock(&self.state).max_open_handles
    }
}

fn is_path(path: &DevicePath, name: &str) -> bool {
    path.as_c_str().to_bytes() == name.as_bytes()
}

impl HidHost for MockHost {
    type Device = MockHandle;

    fn enumerate(&self) -> Result<Vec<DevicePath>, DeviceError> {
        let mut state = lock(&self.state);
        state.enumerations += 1;
        if state.fail_enumeration {
            return Err(io_error("enumeration"));
        }
        Ok(state.devices.iter().map(|d| d.path.clone()).collect())
    }

    fn open(&self, path: &DevicePath) -> Result<MockHandle, DeviceError> {
        let mut state = lock(&self.state);
        if state.device(path)?.fail_open {
            return Err(io_error("open"));
        }

        *state.opened.entry(path.clone()).or_default() += 1;
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        debug!("Mock open {path} ({} handles open)", state.open_handles);

        Ok(MockHandle {
            state: Arc::clone(&self.state),
            path: path.clone(),
        })
    }
}

/// An open simulated device. Dropping it closes it.
pub struct MockHandle {
    state: Arc<Mutex<State>>,
    path: DevicePath,
}

impl HidDevice for MockHandle {
    fn attributes(&self) -> Result<UsbId, DeviceError> {
        let state = lock(&self.state);
        let device = state.device(&self.path)?;
        if device.fail_attributes {
            return Err(io_error("attributes"));
        }
        Ok(device.id)
    }

    fn capabilities(&self) -> Result<ReportLengths, DeviceError> {
        let state = lock(&self.state);
        let device = state.device(&self.path)?;
        if device.fail_capabilities {
            return Err(io_error("capabilities"));
        }
        Ok(device.reports)
    }

    fn write_report(&self, report: &[u8]) -> Result<usize, DeviceError> {
        let mut state = lock(&self.state);
        if state.device(&self.path)?.fail_write {
            return Err(io_error("write"));
        }
        state
            .written
            .entry(self.path.clone())
            .or_default()
            .push(report.to_vec());
        Ok(report.len())
    }

    fn read_report(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let state = lock(&self.state);
        let device = state.device(&self.path)?;
        if device.fail_read {
            return Err(io_error("read"));
        }
        let len = device.response.len().min(buf.len());
        buf[..len].copy_from_slice(&device.response[..len]);
        Ok(len)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_handles -= 1;
        debug!("Mock close {} ({} handles open)", self.path, state.open_handles);
    }
}
