use crate::hid::ReportLengths;
use std::fmt::Display;

const STEELSERIES_VID: u16 = 0x1038;

/// Every headset we know how to query, in matching order.
pub const HEADSETS: &[HeadsetProfile] = &[
    // Arctis 7 (2019)
    steelseries("Arctis 7", 0x12ad, 31, 31, &[0x06, 0x18], 2),
];

const fn steelseries(
    name: &'static str,
    pid: u16,
    input_len: u16,
    output_len: u16,
    command: &'static [u8],
    battery_offset: usize,
) -> HeadsetProfile {
    assert!(
        battery_offset < input_len as usize,
        "battery byte lies outside the input report"
    );
    assert!(
        command.len() <= output_len as usize,
        "command does not fit in the output report"
    );

    HeadsetProfile {
        name,
        id: UsbId {
            vid: STEELSERIES_VID,
            pid,
        },
        reports: ReportLengths {
            input: input_len,
            output: output_len,
        },
        command,
        battery_offset,
    }
}

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// How to recognise one headset model and ask it for its battery level.
#[derive(Debug, PartialEq, Eq)]
pub struct HeadsetProfile {
    pub name: &'static str,
    pub id: UsbId,
    /// Report lengths of the receiver interface that answers battery queries. Other interfaces of
    /// the same receiver share its USB ID, so these tell them apart.
    pub reports: ReportLengths,
    /// Output report prefix, starting with the report ID. Zero padded to `reports.output`.
    pub command: &'static [u8],
    /// Index of the battery percentage in the input report, counting the report ID byte.
    pub battery_offset: usize,
}

impl HeadsetProfile {
    /// The full output report that asks for the battery level.
    pub fn command_report(&self) -> Vec<u8> {
        let mut report = vec![0u8; self.reports.output as usize];
        report[..self.command.len()].copy_from_slice(self.command);
        report
    }
}

/// Compatibility of a device, by USB ID alone.
pub enum DeviceCompat {
    /// Matches a catalog entry (report lengths still need checking before use).
    Supported(&'static HeadsetProfile),
    /// Made by a vendor we have profiles for, but not a model we know.
    Untested,
    Incompatible,
}

impl Display for DeviceCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeviceCompat::Supported(headset) => write!(f, "supported: {}", headset.name),
            DeviceCompat::Untested => write!(f, "UNTESTED SteelSeries device"),
            DeviceCompat::Incompatible => write!(f, "incompatible device"),
        }
    }
}

/// Find a device's compatibility based on its USB ID.
pub fn identify_device(id: UsbId) -> DeviceCompat {
    if let Some(headset) = HEADSETS.iter().find(|h| h.id == id) {
        return DeviceCompat::Supported(headset);
    }

    if id.vid == STEELSERIES_VID {
        DeviceCompat::Untested
    } else {
        DeviceCompat::Incompatible
    }
}
