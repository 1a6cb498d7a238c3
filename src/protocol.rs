use crate::catalog::HeadsetProfile;
use crate::hid::{DeviceError, DevicePath, HidDevice, HidHost};
use log::trace;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;

/// How long the receiver needs between taking a command and having its answer ready. Reading
/// earlier can return a stale or empty report.
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Ask the headset at `path` for its battery level. `path` must already have been matched against
/// `headset`. Performs exactly one write/read exchange; the device is opened for the duration of
/// the exchange only.
pub fn query_battery<H: HidHost + ?Sized>(
    host: &H,
    path: &DevicePath,
    headset: &HeadsetProfile,
) -> Result<u8, Error> {
    let device = host.open(path).map_err(Error::Open)?;

    let request = headset.command_report();
    let written = device
        .write_report(&request)
        .map_err(|e| Error::Write(e.into()))?;
    ensure_len(written, request.len()).map_err(Error::Write)?;

    sleep(SETTLE_DELAY);

    let mut response = vec![0u8; headset.reports.input as usize];
    let read = device
        .read_report(&mut response)
        .map_err(|e| Error::Read(e.into()))?;
    ensure_len(read, response.len()).map_err(Error::Read)?;

    trace!("Raw battery report from {path}: {response:02x?}");

    battery_level(&response, headset.battery_offset).ok_or_else(|| {
        Error::Read(IoFailure::Short {
            expected: headset.battery_offset + 1,
            actual: response.len(),
        })
    })
}

/// Pull the battery percentage out of an input report.
pub fn battery_level(report: &[u8], offset: usize) -> Option<u8> {
    report.get(offset).copied()
}

fn ensure_len(actual: usize, expected: usize) -> Result<(), IoFailure> {
    if actual < expected {
        Err(IoFailure::Short { expected, actual })
    } else {
        Ok(())
    }
}

/// A failed battery exchange. Whichever step failed, the device handle has been released.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("could not open device")]
    Open(#[source] DeviceError),

    #[error("could not send battery request")]
    Write(#[source] IoFailure),

    #[error("could not read battery report")]
    Read(#[source] IoFailure),
}

#[derive(Error, Debug)]
pub enum IoFailure {
    #[error("device I/O error")]
    Device(#[from] DeviceError),

    #[error("report was {actual} bytes, expected {expected}")]
    Short { expected: usize, actual: usize },
}
