//! End-to-end cleanup runs: aborts, timeouts, fatal removals and rollbacks

mod common;

use common::{quiet_config, ProjectFixture};
use safeprune::emergency::StopReason;
use safeprune::orchestrator::{CleanupOutcome, CleanupPhase, FileRemover, FsRemover, RemovalError};
use safeprune::system::StaticProbe;
use safeprune::SafeCleanup;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleeps before every removal.
struct SlowRemover(Duration);

impl FileRemover for SlowRemover {
    fn remove(&self, path: &Path) -> Result<u64, RemovalError> {
        thread::sleep(self.0);
        FsRemover.remove(path)
    }
}

/// Fails hard on the n-th removal.
struct FailingRemover {
    fail_at: usize,
    calls: AtomicUsize,
}

impl FileRemover for FailingRemover {
    fn remove(&self, path: &Path) -> Result<u64, RemovalError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(RemovalError::Aborted("device went away".to_string()));
        }
        FsRemover.remove(path)
    }
}

fn build(fx: &ProjectFixture, config: safeprune::SafetyConfig, remover: Arc<dyn FileRemover>) -> SafeCleanup {
    SafeCleanup::builder(fx.root())
        .config(config)
        .probe(Arc::new(StaticProbe::healthy()))
        .remover(remover)
        .dry_run(false)
        .build()
        .unwrap()
}

#[test]
fn test_low_disk_in_strict_mode_aborts_before_backup() {
    let fx = ProjectFixture::new();
    let files = fx.files("target/debug", 3);

    let mut config = quiet_config();
    config.safety.strict_mode = true;
    let cleanup = fx.cleanup_with_probe(config, false, StaticProbe::healthy().with_disk_free(1));

    let result = cleanup.execute_safe_cleanup(&files, "cleanup", true, true);

    assert_eq!(result.outcome, CleanupOutcome::Aborted);
    assert!(!result.success);
    assert!(result.abort_reason.is_some());
    assert!(result.backup_id.is_none());
    assert_eq!(result.files_processed, 0);
    assert!(cleanup.backup_manager().list_backups().is_empty());
    assert!(files.iter().all(|f| f.exists()));
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("disk_space")));
}

#[test]
fn test_timeout_halts_loop_and_runs_cleanup_callbacks_once() {
    let fx = ProjectFixture::new();
    let files = fx.files("cache", 100);

    let mut config = quiet_config();
    config.safety.operation_timeout = Duration::from_millis(100);
    let cleanup = build(&fx, config, Arc::new(SlowRemover(Duration::from_millis(5))));

    let cleanup_runs = Arc::new(AtomicUsize::new(0));
    let counter = cleanup_runs.clone();
    cleanup
        .emergency_manager()
        .register_cleanup_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let result = cleanup.execute_safe_cleanup(&files, "cleanup", true, true);

    assert_eq!(result.outcome, CleanupOutcome::Emergency);
    let context = result.emergency.as_ref().unwrap();
    assert_eq!(context.reason, StopReason::OperationTimeout);
    assert!(result.files_removed > 0);
    assert!(result.files_removed < 100);
    assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);

    // The snapshot taken before removal is restored.
    let rollback = result.rollback.as_ref().unwrap();
    assert!(rollback.success, "{:?}", rollback.errors);
    assert!(files.iter().all(|f| f.exists()));
}

#[test]
fn test_fatal_removal_error_triggers_emergency_rollback() {
    let fx = ProjectFixture::new();
    let files = fx.files("build", 4);

    let remover = Arc::new(FailingRemover {
        fail_at: 2,
        calls: AtomicUsize::new(0),
    });
    let cleanup = build(&fx, quiet_config(), remover);
    let result = cleanup.execute_safe_cleanup(&files, "cleanup", true, true);

    assert_eq!(result.outcome, CleanupOutcome::Emergency);
    assert_eq!(
        result.emergency.as_ref().map(|c| c.reason),
        Some(StopReason::CriticalError)
    );
    assert!(result.error.as_deref().unwrap().contains("device went away"));
    assert_eq!(result.files_removed, 1);
    assert_eq!(result.files_failed, 1);
    assert!(result.rollback.as_ref().unwrap().success);
    assert!(files.iter().all(|f| f.exists()));
}

#[test]
fn test_user_abort_from_another_thread() {
    let fx = ProjectFixture::new();
    let files = fx.files("logs", 50);
    let cleanup = build(&fx, quiet_config(), Arc::new(SlowRemover(Duration::from_millis(20))));

    let result = thread::scope(|s| {
        s.spawn(|| loop {
            let running = cleanup
                .list_active_operations()
                .into_iter()
                .find(|op| op.phase == CleanupPhase::CleanupExecution);
            if let Some(op) = running {
                assert!(cleanup.abort_operation(&op.operation_id));
                break;
            }
            thread::sleep(Duration::from_millis(1));
        });
        cleanup.execute_safe_cleanup(&files, "cleanup", true, true)
    });

    assert_eq!(result.outcome, CleanupOutcome::Emergency);
    assert_eq!(
        result.emergency.as_ref().map(|c| c.reason),
        Some(StopReason::UserAbort)
    );
    assert!(result.files_removed < 50);
    assert!(files.iter().all(|f| f.exists()));
    assert!(cleanup.list_active_operations().is_empty());
}

#[test]
fn test_manager_is_reusable_after_emergency() {
    let fx = ProjectFixture::new();
    let first = fx.files("one", 2);
    let remover = Arc::new(FailingRemover {
        fail_at: 1,
        calls: AtomicUsize::new(0),
    });
    let cleanup = build(&fx, quiet_config(), remover);

    let failed = cleanup.execute_safe_cleanup(&first, "cleanup", true, true);
    assert_eq!(failed.outcome, CleanupOutcome::Emergency);

    let second = fx.files("two", 2);
    let result = cleanup.execute_safe_cleanup(&second, "cleanup", false, true);
    assert_eq!(result.outcome, CleanupOutcome::Completed);
    assert!(result.success);
    assert!(second.iter().all(|f| !f.exists()));
}

#[test]
fn test_dry_run_reports_without_deleting() {
    let fx = ProjectFixture::new();
    let files = fx.files("tmp", 5);
    let cleanup = fx.cleanup(quiet_config(), true);

    let result = cleanup.execute_safe_cleanup(&files, "cleanup", false, false);

    assert!(result.success);
    assert!(result.dry_run);
    assert_eq!(result.files_removed, 5);
    assert!(result.bytes_freed > 0);
    assert!(result.backup_id.is_none());
    assert!(files.iter().all(|f| f.exists()));
}

#[test]
fn test_directory_targets_are_removed_recursively() {
    let fx = ProjectFixture::new();
    fx.files("target/debug/deps", 3);
    let target = fx.root().join("target");
    let cleanup = fx.cleanup(quiet_config(), false);

    let result = cleanup.execute_safe_cleanup(&[target.clone()], "cleanup", false, true);

    assert!(result.success, "{}", result.headline());
    assert!(!target.exists());
    assert_eq!(result.files_removed, 1);
}

#[test]
fn test_audit_trail_stays_verifiable() {
    let fx = ProjectFixture::new();
    let files = fx.files("tmp", 3);
    let cleanup = fx.cleanup(quiet_config(), false);

    cleanup.execute_safe_cleanup(&files, "cleanup", false, true);

    let report = cleanup.audit_logger().verify_integrity();
    assert!(report.integrity_verified, "{:?}", report.chain_breaks);
    assert!(report.chain_length > 5);
}
