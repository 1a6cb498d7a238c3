use crate::catalog::{HeadsetProfile, UsbId};
use crate::hid::{DeviceError, DevicePath, HidDevice, HidHost, ReportLengths};
use log::{debug, info};
use thiserror::Error;

/// The HID subsystem could not list devices at all.
#[derive(Error, Debug)]
#[error("could not enumerate HID devices")]
pub struct EnumerationError(#[source] pub DeviceError);

/// A device with the right USB ID opened, but refused to describe its reports. Usually means it is
/// busy or going away, rather than being the wrong device.
#[derive(Error, Debug)]
#[error("could not query report capabilities of {path}")]
pub struct CapabilityQueryError {
    pub path: DevicePath,
    #[source]
    pub source: DeviceError,
}

/// A supported headset found during a scan.
#[derive(Clone, Debug)]
pub struct Match {
    pub path: DevicePath,
    pub headset: &'static HeadsetProfile,
}

/// List every HID interface currently present.
pub fn enumerate<H: HidHost + ?Sized>(host: &H) -> Result<Vec<DevicePath>, EnumerationError> {
    let paths = host.enumerate().map_err(EnumerationError)?;
    debug!("Enumerated {} HID interfaces", paths.len());
    Ok(paths)
}

/// Whether a device with the given identity and report lengths is an instance of `headset`.
pub fn matches(id: UsbId, reports: ReportLengths, headset: &HeadsetProfile) -> bool {
    id == headset.id && reports == headset.reports
}

/// Open the device at `path` and check it against `headset`. Devices that cannot be opened or
/// identified are reported as unsupported; the device is closed again before returning.
pub fn is_supported<H: HidHost + ?Sized>(
    host: &H,
    path: &DevicePath,
    headset: &HeadsetProfile,
) -> Result<bool, CapabilityQueryError> {
    let device = match host.open(path) {
        Ok(d) => d,
        Err(e) => {
            debug!("Skipping {path}: could not open: {e}");
            return Ok(false);
        }
    };

    let id = match device.attributes() {
        Ok(id) => id,
        Err(e) => {
            debug!("Skipping {path}: could not read attributes: {e}");
            return Ok(false);
        }
    };

    // Most candidates fail here, so spare them the capability query.
    if id != headset.id {
        return Ok(false);
    }

    let reports = device
        .capabilities()
        .map_err(|source| CapabilityQueryError {
            path: path.clone(),
            source,
        })?;

    if !matches(id, reports, headset) {
        debug!(
            "Skipping {path}: {id} has {reports}, {} needs {}",
            headset.name, headset.reports
        );
        return Ok(false);
    }

    Ok(true)
}

/// Find the first supported headset among `paths`. Profiles are tried in catalog order and, for
/// each, paths in enumeration order; the first hit ends the search. Candidates whose capabilities
/// cannot be queried are handed to `skipped` and passed over.
pub fn find_in<H: HidHost + ?Sized>(
    host: &H,
    paths: &[DevicePath],
    headsets: &'static [HeadsetProfile],
    mut skipped: impl FnMut(CapabilityQueryError),
) -> Option<Match> {
    for headset in headsets {
        for path in paths {
            match is_supported(host, path, headset) {
                Ok(true) => {
                    info!("Found {} at {path}", headset.name);
                    return Some(Match {
                        path: path.clone(),
                        headset,
                    });
                }
                Ok(false) => {}
                Err(e) => skipped(e),
            }
        }
    }
    None
}

/// Enumerate devices and find the first supported headset, as [find_in] does.
pub fn find_supported<H: HidHost + ?Sized>(
    host: &H,
    headsets: &'static [HeadsetProfile],
    skipped: impl FnMut(CapabilityQueryError),
) -> Result<Option<Match>, EnumerationError> {
    let paths = enumerate(host)?;
    Ok(find_in(host, &paths, headsets, skipped))
}
