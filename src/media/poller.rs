//! Background poll loop, one thread per media source.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::types::MediaSource;
use crate::dispatch::Dispatcher;

/// Sleep granularity while waiting, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    /// Wait after a connect attempt.
    pub reconnect: Duration,
    /// Wait after a fetch that returned nothing.
    pub empty: Duration,
    /// Wait after every dispatched snapshot or failed fetch.
    pub interval: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(1),
            empty: Duration::from_millis(500),
            interval: Duration::from_millis(500),
        }
    }
}

/// Owner's side of a running poller.
pub struct PollerHandle {
    source: Arc<dyn MediaSource>,
    state: Arc<RwLock<Option<String>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Play state from the most recent successful fetch.
    pub fn state(&self) -> Option<String> {
        self.state.read().clone()
    }

    /// Stop the loop, wait for it and release the source.  An in-flight
    /// request may delay this up to the source's own timeout.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("{} poller thread panicked", self.source.kind().label());
        }
        self.source.cleanup();
    }
}

pub fn spawn_poller(
    source: Arc<dyn MediaSource>,
    dispatcher: Arc<Dispatcher>,
    timing: PollTiming,
) -> std::io::Result<PollerHandle> {
    let state = Arc::new(RwLock::new(None));
    let running = Arc::new(AtomicBool::new(true));

    let thread = {
        let source = source.clone();
        let state = state.clone();
        let running = running.clone();
        std::thread::Builder::new()
            .name(format!("poll-{}", source.kind().label().to_lowercase()))
            .spawn(move || poll_loop(&*source, &dispatcher, &state, &running, timing))?
    };

    Ok(PollerHandle {
        source,
        state,
        running,
        thread: Some(thread),
    })
}

fn poll_loop(
    source: &dyn MediaSource,
    dispatcher: &Dispatcher,
    state: &RwLock<Option<String>>,
    running: &AtomicBool,
    timing: PollTiming,
) {
    let name = source.kind().label();
    let mut last_connect_error: Option<String> = None;
    log::info!("{name} poller started");

    while running.load(Ordering::Acquire) {
        if !source.is_connected() {
            match source.connect() {
                Ok(()) => last_connect_error = None,
                Err(e) => {
                    // Only log when the reason changes; retries are every second.
                    let msg = e.to_string();
                    if last_connect_error.as_ref() != Some(&msg) {
                        log::warn!("{msg}");
                    } else {
                        log::debug!("{msg}");
                    }
                    last_connect_error = Some(msg);
                }
            }
            sleep_while_running(running, timing.reconnect);
            continue;
        }

        match source.fetch_snapshot() {
            Ok(Some(snapshot)) => {
                *state.write() = snapshot.state();
                let report = dispatcher.dispatch(source.kind(), &snapshot);
                if report.sent > 0 || report.failed > 0 {
                    log::debug!("{name} dispatch: {report:?}");
                }
            }
            Ok(None) => {
                sleep_while_running(running, timing.empty);
                continue;
            }
            Err(e) => {
                log::error!("{name} error: {e}");
                source.mark_disconnected();
                *state.write() = None;
            }
        }
        sleep_while_running(running, timing.interval);
    }
    log::info!("{name} poller stopped");
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
