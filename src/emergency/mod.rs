//! Cooperative emergency stops.
//!
//! The manager moves through `Idle -> Armed -> Stopping -> Stopped`. A stop can be
//! triggered by a signal, the resource monitor, an elapsed operation timeout, an
//! operation error or an explicit call; only the first trigger builds the
//! [`EmergencyContext`] and runs the registered callbacks. Removal loops poll
//! [`EmergencyStopManager::is_stop_requested`] between files.

mod error;
mod monitor;
#[cfg(unix)]
mod signals;
mod types;

pub use error::{EmergencyError, EmergencyResult};
pub use types::{EmergencyContext, EmergencyReport, StopCause, StopPhase, StopReason};

use crate::lock_unpoisoned;
use crate::system::ResourceProbe;
use crate::validation::StopSignal;
use chrono::Utc;
use monitor::{ResourceMonitor, Thresholds};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
#[cfg(not(unix))]
use tracing::warn;

/// Callback run when a stop fires. Errors and panics are logged and ignored.
pub type EmergencyCallback = Arc<dyn Fn(&EmergencyContext) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct StopState {
    phase: StopPhase,
    operation_id: Option<String>,
    current_phase: Option<String>,
    started_at: Option<Instant>,
    timeout: Option<Duration>,
    context: Option<EmergencyContext>,
}

struct Shared {
    state: Mutex<StopState>,
    stop_flag: AtomicBool,
    cleanup_callbacks: Mutex<Vec<EmergencyCallback>>,
    rollback_callbacks: Mutex<Vec<EmergencyCallback>>,
    monitor: Mutex<Option<ResourceMonitor>>,
    #[cfg(unix)]
    signals: Mutex<Option<signals::SignalListener>>,
    probe: Arc<dyn ResourceProbe>,
    monitor_path: PathBuf,
}

/// Coordinates emergency stops for one process. Cloning shares the same state.
#[derive(Clone)]
pub struct EmergencyStopManager {
    shared: Arc<Shared>,
}

impl EmergencyStopManager {
    /// `monitor_path` selects the filesystem watched for free space.
    pub fn new(monitor_path: impl Into<PathBuf>, probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StopState::default()),
                stop_flag: AtomicBool::new(false),
                cleanup_callbacks: Mutex::new(Vec::new()),
                rollback_callbacks: Mutex::new(Vec::new()),
                monitor: Mutex::new(None),
                #[cfg(unix)]
                signals: Mutex::new(None),
                probe,
                monitor_path: monitor_path.into(),
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn monitor_path(&self) -> &Path {
        &self.shared.monitor_path
    }

    pub fn register_cleanup_callback<F>(&self, callback: F)
    where
        F: Fn(&EmergencyContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock_unpoisoned(&self.shared.cleanup_callbacks).push(Arc::new(callback));
        debug!("Registered emergency cleanup callback");
    }

    pub fn register_rollback_callback<F>(&self, callback: F)
    where
        F: Fn(&EmergencyContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock_unpoisoned(&self.shared.rollback_callbacks).push(Arc::new(callback));
        debug!("Registered emergency rollback callback");
    }

    /// Route SIGINT, SIGTERM and SIGUSR1 to the trigger. Installing twice is a no-op.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> EmergencyResult<()> {
        let mut slot = lock_unpoisoned(&self.shared.signals);
        if slot.is_some() {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.shared);
        let listener = signals::SignalListener::install(move |reason, message| {
            if let Some(manager) = Self::from_weak(&weak) {
                manager.trigger_emergency_stop(reason, message, Vec::new());
            }
        })
        .map_err(EmergencyError::SignalInstall)?;
        *slot = Some(listener);
        info!("Emergency stop signal handlers installed");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> EmergencyResult<()> {
        warn!("Signal handlers are only supported on unix platforms");
        Ok(())
    }

    #[cfg(unix)]
    pub fn uninstall_signal_handlers(&self) {
        let listener = lock_unpoisoned(&self.shared.signals).take();
        if let Some(listener) = listener {
            listener.close();
            info!("Emergency stop signal handlers removed");
        }
    }

    #[cfg(not(unix))]
    pub fn uninstall_signal_handlers(&self) {}

    pub fn signal_handlers_installed(&self) -> bool {
        #[cfg(unix)]
        {
            lock_unpoisoned(&self.shared.signals).is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Poll free disk space and available memory, replacing any running poller.
    pub fn start_resource_monitoring(
        &self,
        disk_threshold_bytes: u64,
        memory_threshold_bytes: u64,
        interval: Duration,
    ) -> EmergencyResult<()> {
        self.stop_resource_monitoring();

        let thresholds = Thresholds {
            disk_free_bytes: disk_threshold_bytes,
            available_memory_bytes: memory_threshold_bytes,
            interval,
            path: self.shared.monitor_path.clone(),
        };
        let weak = Arc::downgrade(&self.shared);
        let monitor = ResourceMonitor::spawn(self.shared.probe.clone(), thresholds, move |message| {
            error!("{}", message);
            if let Some(manager) = Self::from_weak(&weak) {
                manager.trigger_emergency_stop(StopReason::ResourceThreshold, message, Vec::new());
            }
        })
        .map_err(EmergencyError::MonitorSpawn)?;

        *lock_unpoisoned(&self.shared.monitor) = Some(monitor);
        info!(
            disk_threshold_mb = disk_threshold_bytes / (1024 * 1024),
            memory_threshold_mb = memory_threshold_bytes / (1024 * 1024),
            "Resource monitoring started"
        );
        Ok(())
    }

    pub fn stop_resource_monitoring(&self) {
        let monitor = lock_unpoisoned(&self.shared.monitor).take();
        if let Some(monitor) = monitor {
            monitor.stop();
            debug!("Resource monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock_unpoisoned(&self.shared.monitor).is_some()
    }

    /// Record the running operation and arm the manager. Restarts the timeout clock.
    pub fn set_operation_context(&self, operation_id: &str, phase: &str, timeout: Option<Duration>) {
        let mut state = lock_unpoisoned(&self.shared.state);
        state.operation_id = Some(operation_id.to_string());
        state.current_phase = Some(phase.to_string());
        state.started_at = Some(Instant::now());
        state.timeout = timeout;
        if state.phase == StopPhase::Idle {
            state.phase = StopPhase::Armed;
        }
        debug!("Operation context set: {} - {}", operation_id, phase);
    }

    /// Update the phase label without touching the timeout clock.
    pub fn set_phase(&self, phase: &str) {
        lock_unpoisoned(&self.shared.state).current_phase = Some(phase.to_string());
    }

    pub fn phase(&self) -> StopPhase {
        lock_unpoisoned(&self.shared.state).phase
    }

    pub fn context(&self) -> Option<EmergencyContext> {
        lock_unpoisoned(&self.shared.state).context.clone()
    }

    /// Whether a stop already fired, without evaluating the timeout.
    pub fn stop_triggered(&self) -> bool {
        self.shared.stop_flag.load(Ordering::SeqCst)
    }

    /// Whether a stop fired. An elapsed timeout fires one here.
    pub fn is_stop_requested(&self) -> bool {
        if self.shared.stop_flag.load(Ordering::SeqCst) {
            return true;
        }

        let expired = {
            let state = lock_unpoisoned(&self.shared.state);
            match (state.phase, state.started_at, state.timeout) {
                (StopPhase::Armed, Some(started), Some(timeout)) => {
                    let elapsed = started.elapsed();
                    (elapsed > timeout).then_some((elapsed, timeout))
                }
                _ => None,
            }
        };

        match expired {
            Some((elapsed, timeout)) => {
                let message = format!(
                    "Operation timeout: {:.1}s > {:.1}s",
                    elapsed.as_secs_f64(),
                    timeout.as_secs_f64()
                );
                error!("{}", message);
                self.trigger_emergency_stop(StopReason::OperationTimeout, message, Vec::new());
                true
            }
            None => self.shared.stop_flag.load(Ordering::SeqCst),
        }
    }

    /// Fire a stop. Returns `true` only for the call that actually fired it.
    pub fn trigger_emergency_stop(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        files_in_progress: Vec<PathBuf>,
    ) -> bool {
        let message = message.into();
        let context = {
            let mut state = lock_unpoisoned(&self.shared.state);
            if state.context.is_some() {
                debug!("Emergency stop already in progress, ignoring {}", reason);
                return false;
            }
            let context = EmergencyContext {
                reason,
                message,
                timestamp: Utc::now(),
                operation_id: state.operation_id.clone(),
                current_phase: state.current_phase.clone(),
                cleanup_required: true,
                rollback_required: true,
                files_in_progress,
            };
            state.context = Some(context.clone());
            state.phase = StopPhase::Stopping;
            self.shared.stop_flag.store(true, Ordering::SeqCst);
            context
        };

        error!(
            reason = %context.reason,
            operation_id = context.operation_id.as_deref().unwrap_or("-"),
            "EMERGENCY STOP TRIGGERED: {}",
            context.message
        );

        self.stop_resource_monitoring();
        self.run_callbacks("cleanup", &self.shared.cleanup_callbacks, &context);
        if context.rollback_required {
            self.run_callbacks("rollback", &self.shared.rollback_callbacks, &context);
        }

        {
            // A reset may have raced the callbacks.
            let mut state = lock_unpoisoned(&self.shared.state);
            if state.phase == StopPhase::Stopping {
                state.phase = StopPhase::Stopped;
            }
        }
        info!("Emergency stop procedures completed");
        true
    }

    fn run_callbacks(&self, kind: &str, callbacks: &Mutex<Vec<EmergencyCallback>>, context: &EmergencyContext) {
        let callbacks: Vec<EmergencyCallback> = lock_unpoisoned(callbacks).clone();
        for (index, callback) in callbacks.iter().enumerate() {
            debug!("Executing {} callback #{}", kind, index);
            match panic::catch_unwind(AssertUnwindSafe(|| callback(context))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Emergency {} callback #{} failed: {:#}", kind, index, e),
                Err(_) => error!("Emergency {} callback #{} panicked", kind, index),
            }
        }
    }

    /// Run `f` armed for `operation_id`.
    ///
    /// An `Err` from `f` fires a stop for the error's [`StopCause`] unless one already
    /// fired; a panic fires `critical_error` and keeps unwinding. Monitoring is always
    /// stopped and the timeout disarmed on exit.
    pub fn operation_context<T, E, F>(
        &self,
        operation_id: &str,
        phase: &str,
        timeout: Option<Duration>,
        files_in_progress: &[PathBuf],
        f: F,
    ) -> Result<T, E>
    where
        E: Display + StopCause,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        self.set_operation_context(operation_id, phase, timeout);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if !self.shared.stop_flag.load(Ordering::SeqCst) {
                    self.trigger_emergency_stop(
                        e.stop_reason(),
                        format!("Critical error during operation: {}", e),
                        files_in_progress.to_vec(),
                    );
                }
                Err(e)
            }
            Err(payload) => {
                self.trigger_emergency_stop(
                    StopReason::CriticalError,
                    format!("Panic during operation: {}", panic_message(payload.as_ref())),
                    files_in_progress.to_vec(),
                );
                self.disarm();
                panic::resume_unwind(payload);
            }
        };

        self.disarm();
        result
    }

    fn disarm(&self) {
        self.stop_resource_monitoring();
        let mut state = lock_unpoisoned(&self.shared.state);
        state.timeout = None;
        if state.phase == StopPhase::Armed {
            state.phase = StopPhase::Idle;
        }
    }

    /// Back to `Idle` for the next operation. Callbacks and signal handlers stay.
    pub fn reset(&self) {
        {
            let mut state = lock_unpoisoned(&self.shared.state);
            *state = StopState::default();
            self.shared.stop_flag.store(false, Ordering::SeqCst);
        }
        self.stop_resource_monitoring();
        debug!("Emergency stop manager reset");
    }

    pub fn emergency_report(&self) -> EmergencyReport {
        let resource_monitoring = self.is_monitoring();
        let signal_handlers_installed = self.signal_handlers_installed();
        let state = lock_unpoisoned(&self.shared.state);
        EmergencyReport {
            state: state.phase,
            stop_requested: self.shared.stop_flag.load(Ordering::SeqCst),
            operation_id: state.operation_id.clone(),
            current_phase: state.current_phase.clone(),
            elapsed: state.started_at.map(|s| s.elapsed()),
            timeout: state.timeout,
            signal_handlers_installed,
            resource_monitoring,
            context: state.context.clone(),
        }
    }
}

impl StopSignal for EmergencyStopManager {
    fn is_stop_requested(&self) -> bool {
        EmergencyStopManager::is_stop_requested(self)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SafetyError;
    use crate::system::StaticProbe;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn manager() -> EmergencyStopManager {
        EmergencyStopManager::new("/", Arc::new(StaticProbe::healthy()))
    }

    fn counter(manager: &EmergencyStopManager) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let c = cleanups.clone();
        manager.register_cleanup_callback(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let r = rollbacks.clone();
        manager.register_rollback_callback(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (cleanups, rollbacks)
    }

    #[test]
    fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.phase(), StopPhase::Idle);
        assert!(!manager.is_stop_requested());
        assert!(manager.context().is_none());
    }

    #[test]
    fn test_trigger_is_idempotent() {
        let manager = manager();
        let (cleanups, rollbacks) = counter(&manager);
        manager.set_operation_context("op_1", "cleanup_execution", None);

        assert!(manager.trigger_emergency_stop(StopReason::UserAbort, "first", Vec::new()));
        assert!(!manager.trigger_emergency_stop(StopReason::CriticalError, "second", Vec::new()));

        let context = manager.context().unwrap();
        assert_eq!(context.reason, StopReason::UserAbort);
        assert_eq!(context.message, "first");
        assert_eq!(context.operation_id.as_deref(), Some("op_1"));
        assert_eq!(context.current_phase.as_deref(), Some("cleanup_execution"));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase(), StopPhase::Stopped);
    }

    #[test]
    fn test_concurrent_triggers_fire_once() {
        let manager = manager();
        let (cleanups, _) = counter(&manager);
        let fired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                let fired = fired.clone();
                thread::spawn(move || {
                    if manager.trigger_emergency_stop(
                        StopReason::SignalTermination,
                        format!("thread {i}"),
                        Vec::new(),
                    ) {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callbacks_do_not_stop_others() {
        let manager = manager();
        manager.register_cleanup_callback(|_| anyhow::bail!("cleanup broke"));
        manager.register_cleanup_callback(|_| panic!("cleanup panicked"));
        let (cleanups, rollbacks) = counter(&manager);

        assert!(manager.trigger_emergency_stop(StopReason::CriticalError, "boom", Vec::new()));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase(), StopPhase::Stopped);
    }

    #[test]
    fn test_lazy_timeout() {
        let manager = manager();
        manager.set_operation_context("op_1", "cleanup_execution", Some(Duration::from_millis(20)));
        assert!(!manager.is_stop_requested());
        thread::sleep(Duration::from_millis(60));
        assert!(manager.is_stop_requested());
        assert_eq!(manager.context().unwrap().reason, StopReason::OperationTimeout);
    }

    #[test]
    fn test_set_phase_keeps_clock() {
        let manager = manager();
        manager.set_operation_context("op_1", "a", Some(Duration::from_millis(20)));
        thread::sleep(Duration::from_millis(60));
        manager.set_phase("b");
        assert!(manager.is_stop_requested());
        assert_eq!(manager.context().unwrap().current_phase.as_deref(), Some("b"));
    }

    #[test]
    fn test_operation_context_error_triggers_stop() {
        let manager = manager();
        let files = vec![PathBuf::from("/tmp/a")];
        let result: Result<(), SafetyError> =
            manager.operation_context("op_1", "cleanup_execution", None, &files, |_| {
                Err(SafetyError::interrupted("interrupted"))
            });
        assert!(result.is_err());

        let context = manager.context().unwrap();
        assert_eq!(context.reason, StopReason::KeyboardInterrupt);
        assert_eq!(context.files_in_progress, files);
    }

    #[test]
    fn test_operation_context_success_disarms() {
        let manager = manager();
        let value: Result<u32, SafetyError> = manager.operation_context(
            "op_1",
            "cleanup_execution",
            Some(Duration::from_millis(10)),
            &[],
            |m| {
                assert_eq!(m.phase(), StopPhase::Armed);
                Ok(7)
            },
        );
        assert_eq!(value.unwrap(), 7);
        thread::sleep(Duration::from_millis(30));
        assert!(!manager.is_stop_requested());
        assert_eq!(manager.phase(), StopPhase::Idle);
    }

    #[test]
    fn test_operation_context_panic_triggers_and_resumes() {
        let manager = manager();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), SafetyError> =
                manager.operation_context("op_1", "cleanup_execution", None, &[], |_| {
                    panic!("removal exploded")
                });
        }));
        assert!(outcome.is_err());
        let context = manager.context().unwrap();
        assert_eq!(context.reason, StopReason::CriticalError);
        assert!(context.message.contains("removal exploded"));
    }

    #[test]
    fn test_resource_breach_triggers_stop() {
        let manager = EmergencyStopManager::new(
            "/",
            Arc::new(StaticProbe::healthy().with_disk_free(1024)),
        );
        manager
            .start_resource_monitoring(1 << 30, 1 << 20, Duration::from_millis(10))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !manager.is_stop_requested() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let context = manager.context().unwrap();
        assert_eq!(context.reason, StopReason::ResourceThreshold);
        // The monitor thread may still be unwinding its own handle.
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.phase() != StopPhase::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(manager.phase(), StopPhase::Stopped);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let manager = manager();
        manager.trigger_emergency_stop(StopReason::UserAbort, "stop", Vec::new());
        manager.reset();
        assert_eq!(manager.phase(), StopPhase::Idle);
        assert!(!manager.is_stop_requested());
        assert!(manager.trigger_emergency_stop(StopReason::UserAbort, "again", Vec::new()));
    }

    #[test]
    fn test_report_serializes() {
        let manager = manager();
        manager.set_operation_context("op_1", "backup", Some(Duration::from_secs(60)));
        let report = manager.emergency_report();
        assert_eq!(report.state, StopPhase::Armed);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "armed");
        assert_eq!(json["timeout"], "1m");
    }
}
