use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use headset_battery::catalog::{HEADSETS, UsbId, identify_device};
use headset_battery::config::Config;
use headset_battery::discovery::find_supported;
use headset_battery::hid::HidapiHost;
use headset_battery::listener::Listener;
use headset_battery::message::{BatteryMessage, BatteryTier};
use headset_battery::protocol::query_battery;
use hidapi::HidApi;
use log::{info, warn};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "headset-battery", version, about)]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all connected HID devices and whether they are supported
    List,

    /// Find a supported headset and print its battery level once
    Query {
        /// Give up on the battery report after this many milliseconds (-1 waits forever)
        #[arg(long, default_value_t = 1000, allow_negative_numbers = true)]
        read_timeout_ms: i32,
    },

    /// Keep reporting the battery level, following the headset across reconnects
    Listen {
        /// TOML file with listener settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds between scans while no headset is bound (overrides config file)
        #[arg(long)]
        scan_interval: Option<u64>,

        /// Seconds between battery queries (overrides config file)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
}

#[derive(Error, Debug)]
enum MatchError {
    #[error("no supported headset found")]
    NoDevices,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("HEADSET_BATTERY_LOG", "info")
            .write_style("HEADSET_BATTERY_LOG_STYLE"),
    )
    .init();

    let opt = Opt::parse();

    match opt.command {
        Command::List => list(&HidApi::new()?),
        Command::Query { read_timeout_ms } => query(read_timeout_ms)?,
        Command::Listen {
            config,
            scan_interval,
            poll_interval,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Config::default(),
            };
            if let Some(secs) = scan_interval {
                config.scan_interval_secs = secs;
            }
            if let Some(secs) = poll_interval {
                config.poll_interval_secs = secs;
            }
            config.validate()?;

            listen(config)?;
        }
    };

    Ok(())
}

fn list(hidapi: &HidApi) {
    for dev in hidapi.device_list() {
        let id = UsbId {
            vid: dev.vendor_id(),
            pid: dev.product_id(),
        };

        println!(
            "{} {} {} [{}]",
            id,
            dev.product_string().unwrap_or("INVALID"),
            dev.path().to_string_lossy(),
            identify_device(id),
        );
    }
}

fn query(read_timeout_ms: i32) -> Result<()> {
    let host = HidapiHost::new(read_timeout_ms)?;

    let found = find_supported(&host, HEADSETS, |e| warn!("Skipping candidate: {e}"))?
        .ok_or(MatchError::NoDevices)?;

    let level = query_battery(&host, &found.path, found.headset)
        .with_context(|| format!("querying {} at {}", found.headset.name, found.path))?;

    println!(
        "{}",
        BatteryMessage::Level {
            headset: found.headset.name,
            level,
        }
    );

    Ok(())
}

fn listen(config: Config) -> Result<()> {
    let host = HidapiHost::new(config.read_timeout_ms)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let listener = Listener::new(host, HEADSETS, config.timing());
        let (tx, mut rx) = mpsc::channel::<BatteryMessage>(config.channel_capacity);
        let cancel = CancellationToken::new();

        let printer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                println!("{msg}");
                if msg.tier() == Some(BatteryTier::Low) {
                    warn!("{} battery is low", msg.headset().unwrap_or("Headset"));
                }
            }
        });

        let shutdown = shutdown_signal()?;
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                shutdown.await;
                info!("Shutting down");
                cancel.cancel();
            }
        });

        listener.run(tx, cancel).await;
        printer.await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Resolves on Ctrl-C, or on SIGTERM where that exists. The handlers are installed before this
/// returns, so a signal arriving before the future is first polled is not lost.
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c() => {}
            _ = terminate.recv() => {}
        }

        #[cfg(not(unix))]
        ctrl_c().await;
    })
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot watch for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
