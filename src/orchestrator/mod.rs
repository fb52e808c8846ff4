//! Safe cleanup orchestration.
//!
//! Phases: `init -> pre_validation -> backup -> emergency_setup ->
//! cleanup_execution -> post_validation -> rollback? -> done`. Every transition
//! lands in the audit trail.
//!
//! Emergency callbacks are registered once at construction and close over the
//! shared operation table, never over [`SafeCleanup`] itself. Whoever restores a
//! snapshot first (the emergency rollback callback or the orchestrator) claims the
//! operation, so a rollback never runs twice.

mod decisions;
mod remover;
mod state;

pub use decisions::{check_proceed, should_backup, should_rollback, ProceedPolicy};
pub use remover::{FileRemover, FsRemover, RemovalError};
pub use state::{CleanupOutcome, CleanupPhase, CleanupResult, OperationState, ValidationSummary};

use crate::audit::{AuditLogger, AuditSummary, FileOperation, OperationScope};
use crate::backup::checksum::sha256_file;
use crate::backup::{absolute, normalize, BackupManager, BackupMetadata};
use crate::config::{load_config, SafetyConfig};
use crate::emergency::{EmergencyContext, EmergencyReport, EmergencyStopManager, StopReason};
use crate::error::{ErrorCode, SafetyError, SafetyResult};
use crate::lock_unpoisoned;
use crate::system::{ResourceProbe, SysinfoProbe};
use crate::validation::{RollbackOutcome, SafetyValidator, StopSignal, ValidationReport};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use state::RemovalStats;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const MB: u64 = 1024 * 1024;

/// State shared with the emergency callbacks
struct Core {
    validator: Arc<SafetyValidator>,
    audit: Arc<AuditLogger>,
    operations: Mutex<HashMap<String, OperationState>>,
    /// Held for each deletion and for the whole of a rollback.
    removal_gate: Mutex<()>,
}

impl Core {
    fn update<R>(&self, operation_id: &str, f: impl FnOnce(&mut OperationState) -> R) -> Option<R> {
        lock_unpoisoned(&self.operations).get_mut(operation_id).map(f)
    }

    /// Restore the operation's snapshot unless someone already did.
    fn rollback_operation(&self, operation_id: &str, abort: Option<&dyn StopSignal>) -> Option<RollbackOutcome> {
        let _gate = lock_unpoisoned(&self.removal_gate);

        let (backup, report) = {
            let mut operations = lock_unpoisoned(&self.operations);
            let op = operations.get_mut(operation_id)?;
            if op.rollback_executed {
                return op.rollback.clone();
            }
            let backup = op.backup.clone()?;
            op.rollback_executed = true;
            op.phase = CleanupPhase::Rollback;
            let report = op
                .post_validation
                .clone()
                .or_else(|| op.pre_validation.clone());
            (backup, report)
        };

        warn!("Rolling back {} from backup {}", operation_id, backup.backup_id);
        let outcome = if backup.is_dry_run() {
            simulated_rollback(&backup)
        } else {
            let report = report.unwrap_or_else(|| ValidationReport::from_checks("rollback", Vec::new()));
            let plan = self.validator.create_rollback_plan(&backup, &report);
            self.validator.execute_rollback(&backup.backup_id, &plan, abort)
        };

        self.audit.log_backup_event(
            operation_id,
            &backup.backup_id,
            "rollback",
            outcome.success,
            json!({
                "restored_files": outcome.restored_files,
                "failed_files": outcome.failed_files,
                "simulated": outcome.simulated,
                "errors": outcome.errors,
            }),
        );
        self.update(operation_id, |op| op.rollback = Some(outcome.clone()));
        Some(outcome)
    }

    fn pending_operations(&self) -> Vec<String> {
        lock_unpoisoned(&self.operations)
            .values()
            .filter(|op| !op.operation_successful && !op.rollback_executed)
            .map(|op| op.operation_id.clone())
            .collect()
    }
}

fn simulated_rollback(backup: &BackupMetadata) -> RollbackOutcome {
    info!("[DRY RUN] Would restore {} files from backup", backup.total_files);
    RollbackOutcome {
        backup_id: backup.backup_id.clone(),
        success: true,
        restored_files: backup.total_files,
        failed_files: 0,
        errors: Vec::new(),
        duration: Duration::ZERO,
        aborted: false,
        simulated: true,
        validation_result: None,
        validation_level: None,
    }
}

/// Overall status for operators
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub project_root: PathBuf,
    pub dry_run: bool,
    pub strict_mode: bool,
    pub active_operations: usize,
    pub backup_directory: PathBuf,
    pub available_backups: usize,
    pub emergency: EmergencyReport,
    pub audit: AuditSummary,
}

/// Builder for [`SafeCleanup`]
pub struct SafeCleanupBuilder {
    project_root: PathBuf,
    config: Option<SafetyConfig>,
    probe: Option<Arc<dyn ResourceProbe>>,
    remover: Option<Arc<dyn FileRemover>>,
    dry_run: Option<bool>,
}

impl SafeCleanupBuilder {
    /// Use `config` instead of loading one from the project.
    pub fn config(mut self, config: SafetyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn remover(mut self, remover: Arc<dyn FileRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    /// Override `safety.dry_run_by_default`.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn build(self) -> SafetyResult<SafeCleanup> {
        let project_root = absolute(&self.project_root);
        let config = match self.config {
            Some(config) => config,
            None => load_config(&project_root)?,
        };
        config.validate()?;

        let dry_run = self.dry_run.unwrap_or(config.safety.dry_run_by_default);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()));
        let remover = self.remover.unwrap_or_else(|| Arc::new(FsRemover));

        let backup = Arc::new(BackupManager::from_config(&project_root, &config)?);
        let validator = Arc::new(SafetyValidator::new(
            &project_root,
            Some(backup.clone()),
            probe.clone(),
            &config,
        ));
        let audit = Arc::new(AuditLogger::from_config(&project_root, &config)?);
        let emergency = EmergencyStopManager::new(&project_root, probe);

        let core = Arc::new(Core {
            validator,
            audit,
            operations: Mutex::new(HashMap::new()),
            removal_gate: Mutex::new(()),
        });
        register_callbacks(&emergency, &core);

        if config.emergency.install_signal_handlers {
            if let Err(e) = emergency.install_signal_handlers() {
                warn!("Continuing without signal handlers: {}", e);
            }
        }

        core.audit.log_system_event(
            "Safe cleanup initialized",
            json!({
                "project_root": project_root.display().to_string(),
                "dry_run": dry_run,
                "strict_mode": config.safety.strict_mode,
            }),
        );
        info!("Initialized safe cleanup (dry_run={})", dry_run);

        Ok(SafeCleanup {
            project_root,
            config,
            dry_run,
            backup,
            emergency,
            remover,
            core,
        })
    }
}

fn register_callbacks(emergency: &EmergencyStopManager, core: &Arc<Core>) {
    let cleanup_core = Arc::clone(core);
    emergency.register_cleanup_callback(move |context: &EmergencyContext| {
        warn!("Emergency cleanup triggered: {}", context.reason);
        for operation_id in cleanup_core.pending_operations() {
            cleanup_core.audit.log_emergency_event(
                &operation_id,
                format!("Emergency stop: {}", context.message),
                json!({
                    "reason": context.reason,
                    "phase": context.current_phase,
                    "files_in_progress": context.files_in_progress.len(),
                }),
            );
        }
        Ok(())
    });

    let rollback_core = Arc::clone(core);
    emergency.register_rollback_callback(move |context: &EmergencyContext| {
        warn!("Emergency rollback triggered: {}", context.reason);
        for operation_id in rollback_core.pending_operations() {
            match rollback_core.rollback_operation(&operation_id, None) {
                Some(outcome) if outcome.success => {
                    info!("Emergency rollback completed for {}", operation_id)
                }
                Some(outcome) => error!(
                    "Emergency rollback failed for {}: {}",
                    operation_id,
                    outcome.errors.join("; ")
                ),
                None => debug!("No backup to roll back for {}", operation_id),
            }
        }
        Ok(())
    });
}

/// Runs candidate removals behind validation, backup, emergency stop and audit.
pub struct SafeCleanup {
    project_root: PathBuf,
    config: SafetyConfig,
    dry_run: bool,
    backup: Arc<BackupManager>,
    emergency: EmergencyStopManager,
    remover: Arc<dyn FileRemover>,
    core: Arc<Core>,
}

/// Removes the operation from the active table however the run ends.
struct ActiveGuard<'a> {
    core: &'a Core,
    operation_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(&self.core.operations).remove(&self.operation_id);
    }
}

impl SafeCleanup {
    pub fn builder(project_root: impl Into<PathBuf>) -> SafeCleanupBuilder {
        SafeCleanupBuilder {
            project_root: project_root.into(),
            config: None,
            probe: None,
            remover: None,
            dry_run: None,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn backup_manager(&self) -> &BackupManager {
        &self.backup
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.core.validator
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.core.audit
    }

    pub fn emergency_manager(&self) -> &EmergencyStopManager {
        &self.emergency
    }

    /// Validate, back up, remove and re-validate `files`.
    ///
    /// `user_confirmation` stands for an explicit operator confirmation; it is
    /// only consulted for dangerous live runs when the configuration asks for it.
    pub fn execute_safe_cleanup(
        &self,
        files: &[PathBuf],
        operation_type: &str,
        force_backup: bool,
        user_confirmation: bool,
    ) -> CleanupResult {
        let started = Instant::now();
        let operation_id = format!(
            "{}_{}",
            operation_type,
            Utc::now().format("%Y%m%d_%H%M%S_%6f")
        );
        let files: Vec<PathBuf> = files.iter().map(|f| self.resolve(f)).collect();

        info!(
            "Starting safe cleanup {} over {} files (dry_run={})",
            operation_id,
            files.len(),
            self.dry_run
        );
        lock_unpoisoned(&self.core.operations).insert(
            operation_id.clone(),
            OperationState::new(&operation_id, operation_type, files.clone()),
        );
        let _active = ActiveGuard {
            core: &self.core,
            operation_id: operation_id.clone(),
        };

        let run = Run {
            operation_id: &operation_id,
            operation_type,
            files: &files,
            force_backup,
            user_confirmation,
        };
        let outcome = self
            .core
            .audit
            .operation_context(&operation_id, operation_type, |scope| {
                let result = self.run_phases(&run, scope);
                if !result.success {
                    scope.mark_failed(result.headline());
                }
                Ok::<_, Infallible>(result)
            });
        let mut result = match outcome {
            Ok(result) => result,
            Err(never) => match never {},
        };

        self.set_phase(&operation_id, CleanupPhase::Done);
        self.emergency.reset();
        result.duration = started.elapsed();
        info!("{}", result.headline());
        result
    }

    fn run_phases(&self, run: &Run<'_>, scope: &OperationScope<'_>) -> CleanupResult {
        let audit = scope.logger();
        let op = run.operation_id;
        let mut result = CleanupResult::new(op, run.operation_type, self.dry_run, run.files.len());

        // init
        self.emergency.set_operation_context(op, CleanupPhase::Init.as_str(), None);
        if self.emergency.is_stop_requested() {
            audit.log_emergency_event(op, "Emergency stop requested during initialization", json!({}));
            return self.abort(result, "Emergency stop requested during initialization");
        }

        // pre-validation
        self.enter(op, CleanupPhase::PreValidation);
        audit.log_validation_event(
            op,
            format!("Starting pre-operation validation for {} files", run.files.len()),
            true,
            json!({ "files_count": run.files.len(), "operation_type": run.operation_type }),
        );
        let pre = self.core.validator.validate_pre_operation(run.files, run.operation_type);
        audit.log_validation_event(
            op,
            format!("Pre-validation completed: {}", pre.overall_safety_level),
            pre.can_proceed(),
            json!({
                "result": pre.overall_result,
                "safety_level": pre.overall_safety_level,
                "can_proceed": pre.can_proceed(),
                "issues_count": pre.required_actions.len(),
                "warnings_count": pre.recommendations.len(),
            }),
        );
        result.pre_validation = Some(ValidationSummary::from(&pre));
        result.recommendations = pre
            .required_actions
            .iter()
            .chain(pre.recommendations.iter())
            .cloned()
            .collect();
        self.core.update(op, |state| state.pre_validation = Some(pre.clone()));

        let policy = ProceedPolicy {
            strict_mode: self.config.safety.strict_mode,
            dry_run: self.dry_run,
            require_confirmation: self.config.safety.require_confirmation,
            user_confirmation: run.user_confirmation,
        };
        if let Err(reason) = check_proceed(&pre, policy) {
            error!("Operation {} blocked: {}", op, reason);
            return self.abort(result, reason);
        }

        // backup
        self.enter(op, CleanupPhase::Backup);
        if self.emergency.is_stop_requested() {
            audit.log_emergency_event(op, "Emergency stop requested during backup preparation", json!({}));
            return self.emergency_result(result, op);
        }
        let wants_backup = !run.files.is_empty()
            && should_backup(&pre, run.force_backup, self.dry_run, self.config.safety.create_backup);
        if wants_backup {
            match self.create_backup(run) {
                Ok(backup) => {
                    audit.log_backup_event(
                        op,
                        &backup.backup_id,
                        if backup.is_dry_run() { "simulated" } else { "created" },
                        true,
                        json!({
                            "files_backed_up": backup.total_files,
                            "total_size_bytes": backup.total_size_bytes,
                            "backup_method": backup.backup_method,
                        }),
                    );
                    result.backup_id = Some(backup.backup_id.clone());
                    self.core.update(op, |state| state.backup = Some(backup));
                }
                Err(e) => {
                    audit.log_backup_event(op, "-", "create", false, json!({ "error": e.to_string() }));
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        } else {
            audit.log_backup_event(
                op,
                "-",
                "skipped",
                true,
                json!({ "force_backup": run.force_backup, "dry_run": self.dry_run }),
            );
        }

        // emergency setup
        self.enter(op, CleanupPhase::EmergencySetup);
        if self.config.emergency.resource_monitoring {
            let settings = &self.config.emergency;
            if let Err(e) = self.emergency.start_resource_monitoring(
                settings.disk_threshold_mb.saturating_mul(MB),
                settings.memory_threshold_mb.saturating_mul(MB),
                settings.check_interval,
            ) {
                warn!("Continuing without resource monitoring: {}", e);
            }
        }

        // cleanup execution
        self.set_phase(op, CleanupPhase::CleanupExecution);
        let mut stats = RemovalStats::default();
        let execution = self.emergency.operation_context(
            op,
            CleanupPhase::CleanupExecution.as_str(),
            Some(self.config.safety.operation_timeout),
            run.files,
            |emergency| self.remove_files(run, audit, emergency, &mut stats),
        );
        result.files_processed = stats.processed;
        result.files_removed = stats.removed;
        result.files_failed = stats.failed;
        result.bytes_freed = stats.bytes_freed;

        if let Err(e) = execution {
            error!("Cleanup execution failed: {}", e);
            result.error = Some(e.to_string());
            return self.emergency_result(result, op);
        }
        if stats.halted || self.emergency.stop_triggered() {
            return self.emergency_result(result, op);
        }

        // post-validation
        self.enter(op, CleanupPhase::PostValidation);
        let post = self.core.validator.validate_post_operation(run.files, run.operation_type);
        audit.log_validation_event(
            op,
            format!("Post-validation completed: {}", post.overall_safety_level),
            post.can_proceed(),
            json!({ "result": post.overall_result, "safety_level": post.overall_safety_level }),
        );
        result.post_validation = Some(ValidationSummary::from(&post));
        let rollback_needed = should_rollback(&post, self.config.safety.strict_mode);
        self.core.update(op, |state| state.post_validation = Some(post));

        if rollback_needed {
            self.set_phase(op, CleanupPhase::Rollback);
            match self.core.rollback_operation(op, Some(&self.emergency as &dyn StopSignal)) {
                Some(outcome) => {
                    result.outcome = CleanupOutcome::RolledBack;
                    result.rollback = Some(outcome);
                }
                None => {
                    result.outcome = CleanupOutcome::Failed;
                    result.error =
                        Some("Post-validation failed and no backup is available for rollback".to_string());
                }
            }
            result.success = false;
            return result;
        }

        self.core.update(op, |state| state.operation_successful = true);
        result.outcome = CleanupOutcome::Completed;
        result.success = result.files_failed == 0;
        result
    }

    fn create_backup(&self, run: &Run<'_>) -> SafetyResult<BackupMetadata> {
        if self.dry_run {
            info!("[DRY RUN] Would create safety backup");
            return Ok(self.backup.dry_run_descriptor(run.files, run.operation_type));
        }
        Ok(self
            .backup
            .create_backup(run.files, run.operation_type, self.config.backup.method)?)
    }

    /// The removal loop. Polls for a stop before each file.
    fn remove_files(
        &self,
        run: &Run<'_>,
        audit: &AuditLogger,
        emergency: &EmergencyStopManager,
        stats: &mut RemovalStats,
    ) -> SafetyResult<()> {
        let max_hash_size = self.config.max_file_size_bytes();

        for path in run.files {
            if emergency.is_stop_requested() {
                warn!("Emergency stop requested during cleanup");
                stats.halted = true;
                break;
            }

            let meta = match fs::symlink_metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Already gone: {}", path.display());
                    stats.processed += 1;
                    continue;
                }
                Err(e) => {
                    stats.processed += 1;
                    stats.failed += 1;
                    self.log_removal(audit, run.operation_id, path, None, None, Some(e.to_string()));
                    continue;
                }
            };
            let size = if meta.is_dir() {
                remover::tree_size(path)
            } else {
                meta.len()
            };
            let hash_before = if meta.is_file() && meta.len() <= max_hash_size {
                sha256_file(path).ok()
            } else {
                None
            };

            if self.dry_run {
                debug!("[DRY RUN] Would remove {}", path.display());
                stats.processed += 1;
                stats.removed += 1;
                stats.bytes_freed += size;
                audit.log_file_operation(
                    run.operation_id,
                    FileOperation {
                        path: path.display().to_string(),
                        action: "would_remove".to_string(),
                        success: true,
                        hash_before,
                        hash_after: None,
                        size_before: Some(size),
                        size_after: Some(size),
                        error: None,
                    },
                );
                continue;
            }

            let removal = {
                let _gate = lock_unpoisoned(&self.core.removal_gate);
                if emergency.stop_triggered() {
                    None
                } else {
                    Some(self.remover.remove(path))
                }
            };
            let Some(removal) = removal else {
                stats.halted = true;
                break;
            };

            stats.processed += 1;
            match removal {
                Ok(freed) => {
                    stats.removed += 1;
                    stats.bytes_freed += freed;
                    self.log_removal(audit, run.operation_id, path, hash_before, Some(size), None);
                }
                Err(RemovalError::Aborted(reason)) => {
                    self.log_removal(audit, run.operation_id, path, hash_before, Some(size), Some(reason.clone()));
                    stats.failed += 1;
                    return Err(SafetyError::cleanup_with_code(
                        ErrorCode::CLEANUP_REMOVAL_ABORTED,
                        reason,
                        Some(run.operation_id.to_string()),
                    ));
                }
                Err(e) => {
                    error!("{}", e);
                    stats.failed += 1;
                    self.log_removal(audit, run.operation_id, path, hash_before, Some(size), Some(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn log_removal(
        &self,
        audit: &AuditLogger,
        operation_id: &str,
        path: &Path,
        hash_before: Option<String>,
        size_before: Option<u64>,
        error: Option<String>,
    ) {
        audit.log_file_operation(
            operation_id,
            FileOperation {
                path: path.display().to_string(),
                action: "remove".to_string(),
                success: error.is_none(),
                hash_before,
                hash_after: None,
                size_before,
                size_after: error.as_ref().and(size_before),
                error,
            },
        );
    }

    fn abort(&self, mut result: CleanupResult, reason: impl Into<String>) -> CleanupResult {
        let reason = reason.into();
        warn!("Aborting {}: {}", result.operation_id, reason);
        result.outcome = CleanupOutcome::Aborted;
        result.success = false;
        result.abort_reason = Some(reason);
        result
    }

    /// Finish a run that an emergency stop interrupted, rolling back if a snapshot exists.
    fn emergency_result(&self, mut result: CleanupResult, operation_id: &str) -> CleanupResult {
        let context = self.emergency.context();
        if let Some(context) = &context {
            self.core.audit.log_emergency_event(
                operation_id,
                format!("Operation halted: {}", context.message),
                json!({ "reason": context.reason, "phase": context.current_phase }),
            );
        }

        result.outcome = CleanupOutcome::Emergency;
        result.success = false;
        result.abort_reason = context.as_ref().map(|c| c.message.clone());
        result.rollback = self.core.rollback_operation(operation_id, None);
        result.emergency = context;
        result
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.project_root.join(path))
        }
    }

    fn set_phase(&self, operation_id: &str, phase: CleanupPhase) {
        self.core.update(operation_id, |state| state.phase = phase);
        self.emergency.set_phase(phase.as_str());
    }

    fn enter(&self, operation_id: &str, phase: CleanupPhase) {
        info!("Phase {}: {}", phase, operation_id);
        self.set_phase(operation_id, phase);
    }

    /// Snapshot of every operation currently running.
    pub fn list_active_operations(&self) -> Vec<OperationState> {
        lock_unpoisoned(&self.core.operations).values().cloned().collect()
    }

    /// Ask an active operation to stop. Returns `false` for unknown ids.
    pub fn abort_operation(&self, operation_id: &str) -> bool {
        let files = match lock_unpoisoned(&self.core.operations).get(operation_id) {
            Some(op) => op.files.clone(),
            None => return false,
        };
        self.core.audit.log_emergency_event(
            operation_id,
            "Operation aborted by user",
            json!({}),
        );
        self.emergency
            .trigger_emergency_stop(StopReason::UserAbort, "Operation aborted by user", files);
        true
    }

    pub fn safety_status(&self) -> SafetyStatus {
        SafetyStatus {
            project_root: self.project_root.clone(),
            dry_run: self.dry_run,
            strict_mode: self.config.safety.strict_mode,
            active_operations: lock_unpoisoned(&self.core.operations).len(),
            backup_directory: self.backup.backup_root().to_path_buf(),
            available_backups: self.backup.list_backups().len(),
            emergency: self.emergency.emergency_report(),
            audit: self.core.audit.audit_summary(),
        }
    }
}

struct Run<'a> {
    operation_id: &'a str,
    operation_type: &'a str,
    files: &'a [PathBuf],
    force_backup: bool,
    user_confirmation: bool,
}
