pub mod descriptor;

use crate::catalog::UsbId;
use hidapi::{HidApi, HidError, MAX_REPORT_DESCRIPTOR_SIZE};
use log::trace;
use std::ffi::{CStr, CString, NulError};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub use descriptor::{DescriptorError, ReportLengths};

/// OS identifier of one HID interface. Only meaningful for the enumeration pass that produced it:
/// once a device is unplugged and replugged it may come back under a different path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DevicePath(CString);

impl DevicePath {
    pub fn as_c_str(&self) -> &CStr {
        &self.0
    }
}

impl From<&CStr> for DevicePath {
    fn from(path: &CStr) -> Self {
        DevicePath(path.to_owned())
    }
}

impl FromStr for DevicePath {
    type Err = NulError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CString::new(s).map(DevicePath)
    }
}

impl Display for DevicePath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

/// Failures of individual device operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("HID API error")]
    Hid(#[from] HidError),

    #[error("unusable report descriptor")]
    Descriptor(#[from] DescriptorError),

    #[error("device is no longer connected")]
    Disconnected,
}

/// The OS device subsystem: lists HID interfaces and opens them.
pub trait HidHost: Send + Sync + 'static {
    type Device: HidDevice;

    /// Paths of every HID interface currently present, in enumeration order.
    fn enumerate(&self) -> Result<Vec<DevicePath>, DeviceError>;

    /// Open a device for exclusive use. The device is closed when the returned handle is dropped.
    fn open(&self, path: &DevicePath) -> Result<Self::Device, DeviceError>;
}

/// An open HID device.
pub trait HidDevice {
    fn attributes(&self) -> Result<UsbId, DeviceError>;

    fn capabilities(&self) -> Result<ReportLengths, DeviceError>;

    /// Send one output report. Returns the number of bytes the OS accepted.
    fn write_report(&self, report: &[u8]) -> Result<usize, DeviceError>;

    /// Receive one input report into `buf`. Returns the number of bytes read.
    fn read_report(&self, buf: &mut [u8]) -> Result<usize, DeviceError>;
}

/// [HidHost] backed by the system's hidapi library.
pub struct HidapiHost {
    api: Mutex<HidApi>,
    read_timeout_ms: i32,
}

impl HidapiHost {
    /// `read_timeout_ms` bounds each report read; -1 blocks until the device answers.
    pub fn new(read_timeout_ms: i32) -> Result<Self, HidError> {
        Ok(Self {
            api: Mutex::new(HidApi::new()?),
            read_timeout_ms,
        })
    }

    fn api(&self) -> MutexGuard<'_, HidApi> {
        // HidApi holds no invariants a panicking holder could break.
        self.api.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HidHost for HidapiHost {
    type Device = HidapiDevice;

    fn enumerate(&self) -> Result<Vec<DevicePath>, DeviceError> {
        let mut api = self.api();
        api.refresh_devices()?;

        // Some backends list one entry per top-level usage, all sharing a path.
        let mut paths: Vec<DevicePath> = Vec::new();
        for info in api.device_list() {
            let path = DevicePath::from(info.path());
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn open(&self, path: &DevicePath) -> Result<HidapiDevice, DeviceError> {
        let device = self.api().open_path(path.as_c_str())?;
        Ok(HidapiDevice {
            inner: device,
            read_timeout_ms: self.read_timeout_ms,
        })
    }
}

pub struct HidapiDevice {
    inner: hidapi::HidDevice,
    read_timeout_ms: i32,
}

impl HidDevice for HidapiDevice {
    fn attributes(&self) -> Result<UsbId, DeviceError> {
        let info = self.inner.get_device_info()?;
        Ok(UsbId {
            vid: info.vendor_id(),
            pid: info.product_id(),
        })
    }

    fn capabilities(&self) -> Result<ReportLengths, DeviceError> {
        let mut desc = [0u8; MAX_REPORT_DESCRIPTOR_SIZE];
        let len = self.inner.get_report_descriptor(&mut desc)?;
        trace!("Report descriptor: {:02x?}", &desc[..len]);
        Ok(descriptor::report_lengths(&desc[..len])?)
    }

    fn write_report(&self, report: &[u8]) -> Result<usize, DeviceError> {
        Ok(self.inner.write(report)?)
    }

    fn read_report(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        Ok(self.inner.read_timeout(buf, self.read_timeout_ms)?)
    }
}
