//! Scan for a supported headset, then poll its battery until it goes away.
//!
//! Two tasks cooperate. The scan loop runs on [Listener::run] and, every scan interval, looks for
//! a headset unless one is already bound. When it finds one it spawns a single poll task, which
//! queries the battery right away and then once per poll interval. The poll task exits on the
//! first failed query (unplug, sleep, busy device); the next scan tick then rediscovers the
//! headset, possibly under a new path.
//!
//! The only state the two loops share is the polling flag: the scan loop raises it just before
//! spawning a poller and never spawns while it is up, and the poller lowers it when it exits, no
//! matter how. So there is never more than one poller.

use crate::catalog::HeadsetProfile;
use crate::discovery::{self, Match};
use crate::hid::HidHost;
use crate::message::BatteryMessage;
use crate::protocol;
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// How often to look for a headset while none is bound.
    pub scan_interval: Duration,
    /// How often to query a bound headset.
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct Listener<H> {
    host: Arc<H>,
    headsets: &'static [HeadsetProfile],
    timing: Timing,
    polling: Arc<AtomicBool>,
}

impl<H: HidHost> Listener<H> {
    /// `timing`'s intervals must be non-zero.
    pub fn new(host: H, headsets: &'static [HeadsetProfile], timing: Timing) -> Self {
        Self {
            host: Arc::new(host),
            headsets,
            timing,
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a poll task currently owns a headset.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Scan and poll, sending every message to `tx`, until `cancel` fires or the receiver is
    /// dropped. Returns once the poll task, if any, has exited and released its device. Nothing is
    /// sent after cancellation has been observed.
    pub async fn run(&self, tx: mpsc::Sender<BatteryMessage>, cancel: CancellationToken) {
        let mut ticker = interval(self.timing.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poller: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.is_polling() {
                continue;
            }

            if !send(&tx, BatteryMessage::Scanning, &cancel).await {
                break;
            }

            let found = self.scan().await;
            if cancel.is_cancelled() {
                break;
            }

            if let Some(found) = found {
                let guard = PollingGuard::raise(&self.polling);
                poller = Some(tokio::spawn(poll(
                    Arc::clone(&self.host),
                    found,
                    self.timing.poll_interval,
                    tx.clone(),
                    cancel.clone(),
                    guard,
                )));
            }
        }

        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                error!("Battery poller failed: {e}");
            }
        }
        debug!("Listener stopped");
    }

    /// One discovery pass on the blocking pool.
    async fn scan(&self) -> Option<Match> {
        let host = Arc::clone(&self.host);
        let headsets = self.headsets;
        let result = spawn_blocking(move || {
            discovery::find_supported(&*host, headsets, |e| {
                warn!("Skipping candidate: {}", chain(&e))
            })
        })
        .await;

        match result {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Scan aborted: {}", chain(&e));
                None
            }
            Err(e) => {
                error!("Scan failed: {e}");
                None
            }
        }
    }
}

/// Keeps the polling flag up for as long as it lives.
struct PollingGuard(Arc<AtomicBool>);

impl PollingGuard {
    fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(Arc::clone(flag))
    }
}

impl Drop for PollingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn poll<H: HidHost>(
    host: Arc<H>,
    found: Match,
    poll_interval: Duration,
    tx: mpsc::Sender<BatteryMessage>,
    cancel: CancellationToken,
    _guard: PollingGuard,
) {
    let Match { path, headset } = found;
    info!("Polling {} at {path}", headset.name);

    loop {
        let result = {
            let host = Arc::clone(&host);
            let path = path.clone();
            spawn_blocking(move || protocol::query_battery(&*host, &path, headset)).await
        };
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(Ok(level)) => {
                debug!("{} battery at {level}%", headset.name);
                let msg = BatteryMessage::Level {
                    headset: headset.name,
                    level,
                };
                if !send(&tx, msg, &cancel).await {
                    break;
                }
            }
            Ok(Err(e)) => {
                info!("Lost {} at {path}: {}", headset.name, chain(&e));
                break;
            }
            Err(e) => {
                error!("Battery query failed: {e}");
                break;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(poll_interval) => {}
        }
    }

    debug!("Stopped polling {}", headset.name);
}

/// Returns false if the message could not be delivered and the caller should stop.
async fn send(
    tx: &mpsc::Sender<BatteryMessage>,
    msg: BatteryMessage,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(msg) => match sent {
            Ok(()) => true,
            Err(_) => {
                debug!("Battery message receiver dropped");
                false
            }
        },
    }
}

fn chain(e: &dyn Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(out, ": {cause}");
        source = cause.source();
    }
    out
}
