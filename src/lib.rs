/// Headsets we know how to query, and identification of devices by USB ID.
pub mod catalog;

/// Listener settings loaded from a TOML file.
pub mod config;

/// Find a supported headset among the HID devices currently connected.
pub mod discovery;

/// Access to HID devices through the OS, behind traits that tests can replace.
pub mod hid;

/// Messages the listener sends to its consumer.
pub mod message;

/// Simulated HID devices for tests.
pub mod mock;

/// Ask a headset for its battery level using its vendor report.
pub mod protocol;

/// Long-running scan/poll loop that follows a headset through unplugs and replugs.
pub mod listener;
