//! Background resource polling.

use crate::system::ResourceProbe;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct Thresholds {
    pub disk_free_bytes: u64,
    pub available_memory_bytes: u64,
    pub interval: Duration,
    pub path: PathBuf,
}

/// Handle to a running poller. Dropping it asks the thread to exit.
pub(crate) struct ResourceMonitor {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    /// Poll until a threshold is crossed, then call `on_breach` once and exit.
    pub fn spawn<F>(
        probe: Arc<dyn ResourceProbe>,
        thresholds: Thresholds,
        on_breach: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("safeprune-monitor".to_string())
            .spawn(move || {
                loop {
                    if let Some(message) = check(probe.as_ref(), &thresholds) {
                        on_breach(message);
                        break;
                    }
                    match rx.recv_timeout(thresholds.interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Resource monitor exited");
            })?;

        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Signal the poller and wait for it, unless called from the poller itself.
    pub fn stop(mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Resource monitor thread panicked");
            }
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.shutdown.take();
    }
}

/// One polling round. Returns a breach message when a threshold is crossed.
pub(crate) fn check(probe: &dyn ResourceProbe, thresholds: &Thresholds) -> Option<String> {
    match probe.disk_free_bytes(&thresholds.path) {
        Ok(Some(free)) if free < thresholds.disk_free_bytes => {
            return Some(format!(
                "disk_space threshold breached: {}MB free < {}MB at {}",
                free / MB,
                thresholds.disk_free_bytes / MB,
                thresholds.path.display()
            ));
        }
        Ok(_) => {}
        Err(e) => warn!("Resource monitoring error: {e:#}"),
    }

    match probe.memory() {
        Ok(stats) if stats.available_bytes < thresholds.available_memory_bytes => Some(format!(
            "memory threshold breached: {}MB available < {}MB",
            stats.available_bytes / MB,
            thresholds.available_memory_bytes / MB
        )),
        Ok(_) => None,
        Err(e) => {
            warn!("Resource monitoring error: {e:#}");
            None
        }
    }
}
