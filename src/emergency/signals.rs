//! Signal forwarding thread.

use super::types::StopReason;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Owns the iterator thread. The thread does nothing but forward to `on_signal`.
pub(crate) struct SignalListener {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalListener {
    pub fn install<F>(on_signal: F) -> std::io::Result<Self>
    where
        F: Fn(StopReason, String) + Send + 'static,
    {
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("safeprune-signals".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    let (reason, message) = match sig {
                        SIGINT => (StopReason::KeyboardInterrupt, format!("Received signal {sig}")),
                        SIGTERM => (StopReason::SignalTermination, format!("Received signal {sig}")),
                        SIGUSR1 => (StopReason::SignalTermination, format!("Emergency signal {sig}")),
                        other => {
                            debug!("Ignoring unexpected signal {}", other);
                            continue;
                        }
                    };
                    warn!("Emergency stop requested by signal {}", sig);
                    on_signal(reason, message);
                }
                debug!("Signal listener exited");
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn close(mut self) {
        self.handle.close();
        if let Some(worker) = self.thread.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!("Signal listener thread panicked");
            }
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.close();
    }
}
