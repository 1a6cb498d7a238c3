use crate::listener::{DEFAULT_POLL_INTERVAL, DEFAULT_SCAN_INTERVAL, Timing};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Listener settings, read from a TOML file. Every field is optional.
///
/// ```toml
/// scan_interval_secs = 5
/// poll_interval_secs = 60
/// channel_capacity = 16
/// read_timeout_ms = -1
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scan_interval_secs: u64,
    pub poll_interval_secs: u64,
    /// Messages buffered for a slow consumer before the listener waits on it.
    pub channel_capacity: usize,
    /// Upper bound on each battery report read, in milliseconds. -1 waits for as long as the OS
    /// lets the read block.
    pub read_timeout_ms: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL.as_secs(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            channel_capacity: 16,
            read_timeout_ms: -1,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.scan_interval_secs == 0 {
            return Err(Error::Invalid("scan_interval_secs must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Invalid("poll_interval_secs must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Invalid("channel_capacity must be at least 1"));
        }
        if self.read_timeout_ms < -1 {
            return Err(Error::Invalid("read_timeout_ms must be -1 or more"));
        }
        Ok(())
    }

    pub fn timing(&self) -> Timing {
        Timing {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("could not read config file")]
    Io(#[from] std::io::Error),

    #[error("invalid config file")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(&'static str),
}
