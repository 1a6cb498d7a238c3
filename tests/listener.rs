//! Scan/poll lifecycle against simulated devices. Time is paused, so the 5 s scan and 60 s poll
//! intervals elapse instantly and exactly.

use headset_battery::catalog::{HEADSETS, UsbId};
use headset_battery::hid::ReportLengths;
use headset_battery::listener::{Listener, Timing};
use headset_battery::message::BatteryMessage;
use headset_battery::mock::{MockDevice, MockHost};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SCAN: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_secs(60);

fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

fn arctis(path: &str, level: u8) -> MockDevice {
    let mut response = vec![0u8; 31];
    response[0] = 0x06;
    response[1] = 0x18;
    response[2] = level;
    MockDevice::new(path.parse().unwrap(), HEADSETS[0].id, HEADSETS[0].reports)
        .with_response(response)
}

fn keyboard(path: &str) -> MockDevice {
    let id = UsbId {
        vid: 0x046d,
        pid: 0xc31c,
    };
    MockDevice::new(path.parse().unwrap(), id, ReportLengths { input: 9, output: 2 })
}

fn level(level: u8) -> BatteryMessage {
    BatteryMessage::Level {
        headset: "Arctis 7",
        level,
    }
}

struct Running {
    listener: Arc<Listener<MockHost>>,
    rx: mpsc::Receiver<BatteryMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn start(host: &MockHost) -> Running {
    start_with(
        host,
        Timing {
            scan_interval: SCAN,
            poll_interval: POLL,
        },
    )
}

fn start_with(host: &MockHost, timing: Timing) -> Running {
    init_logger();

    let listener = Arc::new(Listener::new(host.clone(), HEADSETS, timing));
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        async move { listener.run(tx, cancel).await }
    });

    Running {
        listener,
        rx,
        cancel,
        task,
    }
}

impl Running {
    async fn next(&mut self) -> BatteryMessage {
        self.rx.recv().await.expect("listener stopped early")
    }

    async fn stop(self) -> mpsc::Receiver<BatteryMessage> {
        self.cancel.cancel();
        self.task.await.unwrap();
        self.rx
    }
}

#[tokio::test(start_paused = true)]
async fn only_scans_when_nothing_matches() {
    let host = MockHost::new(vec![keyboard("kbd")]);
    let mut running = start(&host);

    let start = Instant::now();
    for tick in 0..4u32 {
        assert_eq!(running.next().await, BatteryMessage::Scanning);
        assert_eq!(Instant::now() - start, SCAN * tick);
    }
    assert!(!running.listener.is_polling());
    assert_eq!(host.written("kbd"), Vec::<Vec<u8>>::new());

    running.stop().await;
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn binds_and_polls_on_interval() {
    let host = MockHost::new(vec![keyboard("kbd"), arctis("p1", 0x37)]);
    let mut running = start(&host);

    let start = Instant::now();
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, level(55));
    assert!(running.listener.is_polling());

    // Scan ticks while polling are suppressed, so the next message is the next poll.
    host.set_response("p1", {
        let mut r = vec![0u8; 31];
        r[2] = 54;
        r
    });
    assert_eq!(running.next().await, level(54));
    assert!(Instant::now() - start >= POLL);
    assert_eq!(running.next().await, level(54));
    assert!(Instant::now() - start >= POLL * 2);

    assert_eq!(host.enumerations(), 1);
    assert_eq!(host.written("p1").len(), 3);
    assert!(
        host.written("p1")
            .iter()
            .all(|r| *r == HEADSETS[0].command_report())
    );

    running.stop().await;
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_poller_with_two_headsets() {
    let host = MockHost::new(vec![arctis("p1", 80), arctis("p2", 30)]);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);
    for _ in 0..5 {
        assert_eq!(running.next().await, level(80));
    }

    assert_eq!(host.enumerations(), 1);
    assert_eq!(host.opened("p2"), 0);
    assert_eq!(host.max_open_handles(), 1);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn write_failure_resumes_scanning() {
    // Poll off the scan grid, so a failed poll and a scan tick never fall on the same instant.
    let poll = Duration::from_secs(62);
    let host = MockHost::new(vec![arctis("p1", 0x37)]);
    let mut running = start_with(
        &host,
        Timing {
            scan_interval: SCAN,
            poll_interval: poll,
        },
    );

    let start = Instant::now();
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, level(55));
    assert_eq!(host.enumerations(), 1);

    host.fail_writes("p1", true);

    // The poll at 62 s fails; the scan tick at 65 s finds the flag lowered and scans again.
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(Instant::now() - start, Duration::from_secs(65));

    // Still present, so it is rebound and fails again on every tick until writes work.
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert!(host.enumerations() >= 2);
    assert_eq!(host.max_open_handles(), 1);

    host.fail_writes("p1", false);
    loop {
        match running.next().await {
            BatteryMessage::Scanning => continue,
            msg => {
                assert_eq!(msg, level(55));
                break;
            }
        }
    }
    assert!(running.listener.is_polling());

    running.stop().await;
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn follows_headset_through_replug() {
    let host = MockHost::new(vec![arctis("p1", 90)]);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, level(90));

    host.unplug("p1");
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert!(!running.listener.is_polling());

    // Comes back under a different path.
    host.plug(arctis("p7", 88));
    loop {
        match running.next().await {
            BatteryMessage::Scanning => continue,
            msg => {
                assert_eq!(msg, level(88));
                break;
            }
        }
    }
    assert!(host.opened("p7") >= 2);

    running.stop().await;
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn enumeration_failure_is_retried() {
    let host = MockHost::new(vec![arctis("p1", 42)]);
    host.fail_enumeration(true);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert!(!running.listener.is_polling());

    host.fail_enumeration(false);
    loop {
        match running.next().await {
            BatteryMessage::Scanning => continue,
            msg => {
                assert_eq!(msg, level(42));
                break;
            }
        }
    }

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn busy_candidate_is_skipped() {
    let host = MockHost::new(vec![
        arctis("busy", 10).failing_capabilities(),
        arctis("p1", 70),
    ]);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, level(70));
    assert_eq!(host.written("busy"), Vec::<Vec<u8>>::new());

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_everything() {
    let host = MockHost::new(vec![arctis("p1", 60)]);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);
    assert_eq!(running.next().await, level(60));

    let mut rx = running.stop().await;

    // Every sender is gone once the listener has returned, so nothing more can arrive.
    assert_eq!(rx.recv().await, None);
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_idle() {
    let host = MockHost::new(vec![]);
    let mut running = start(&host);

    assert_eq!(running.next().await, BatteryMessage::Scanning);

    let mut rx = running.stop().await;
    assert_eq!(rx.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn stops_when_consumer_goes_away() {
    let host = MockHost::new(vec![arctis("p1", 60)]);
    let running = start(&host);

    let Running { rx, task, .. } = running;
    drop(rx);

    tokio::time::timeout(Duration::from_secs(600), task)
        .await
        .expect("listener kept running without a consumer")
        .unwrap();
    assert_eq!(host.open_handles(), 0);
}
