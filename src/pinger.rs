//! The pinger subtask (SPEC_FULL.md §4.5): polls a remote-shell endpoint on
//! its own 500ms cycle, independent of the 1s cycle engine, and latches the
//! result into a [`tokio::sync::watch`] channel so the cycle engine can
//! consult the latest snapshot without blocking on the network itself.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, RemoteShellDriver};

pub const PINGER_CYCLE_TIME: Duration = Duration::from_millis(500);

/// Latest observed state of a remote-shell endpoint, as seen by the pinger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingerSnapshot {
    pub connected: bool,
    pub uname: String,
    pub version: String,
}

/// Handle to a running pinger task. Dropping this without calling
/// [`PingerHandle::close`] leaves the task running; callers that own a
/// component tree should always close pingers on teardown.
pub struct PingerHandle {
    rx: watch::Receiver<PingerSnapshot>,
    stop: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl PingerHandle {
    /// The most recently latched snapshot. Never blocks.
    pub fn snapshot(&self) -> PingerSnapshot {
        self.rx.borrow().clone()
    }

    pub async fn close(mut self) {
        self.stop.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Spawn a pinger task driving `driver` on its own cycle. The driver is
/// moved into the task; the only way back in is through the returned
/// handle's snapshot.
pub fn start(mut driver: RemoteShellDriver) -> PingerHandle {
    let (tx, rx) = watch::channel(PingerSnapshot::default());
    let stop = CancellationToken::new();
    let task_stop = stop.clone();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PINGER_CYCLE_TIME);
        loop {
            tokio::select! {
                biased;
                _ = task_stop.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = run_probe(&mut driver).await;
                    tx.send_modify(|s| *s = snapshot);
                }
            }
        }
        let _ = driver.close().await;
    });

    PingerHandle { rx, stop, join: Some(join) }
}

async fn run_probe(driver: &mut RemoteShellDriver) -> PingerSnapshot {
    if driver.open().await.is_err() {
        return PingerSnapshot::default();
    }

    let uname = driver.probe_line("uname").await;
    let version = driver.probe_line("version").await;

    match (uname, version) {
        (Some(uname), Some(version)) => PingerSnapshot { connected: true, uname, version },
        _ => PingerSnapshot::default(),
    }
}
