//! Pre- and post-operation safety validation.
//!
//! Validation never fails: every probe or I/O problem becomes a check result, and
//! the checks are aggregated into a [`ValidationReport`].

mod checks;
mod rollback;
mod types;

pub use rollback::{RiskLevel, RollbackOutcome, RollbackPlan, StopSignal};
pub use types::{CheckKind, CheckProfile, CheckResult, SafetyCheck, SafetyLevel, ValidationReport};

use crate::backup::{normalize, BackupManager, BackupMetadata};
use crate::config::{SafetyConfig, ValidationSettings};
use crate::system::ResourceProbe;
use checks::CheckContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs safety checks for one project
pub struct SafetyValidator {
    project_root: PathBuf,
    backup_manager: Option<Arc<BackupManager>>,
    strict_mode: bool,
    backups_enabled: bool,
    settings: ValidationSettings,
    probe: Arc<dyn ResourceProbe>,
}

impl SafetyValidator {
    pub fn new(
        project_root: impl Into<PathBuf>,
        backup_manager: Option<Arc<BackupManager>>,
        probe: Arc<dyn ResourceProbe>,
        config: &SafetyConfig,
    ) -> Self {
        Self {
            project_root: normalize(&project_root.into()),
            backup_manager,
            strict_mode: config.safety.strict_mode,
            backups_enabled: config.safety.create_backup,
            settings: config.validation.clone(),
            probe,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn backup_manager(&self) -> Option<&Arc<BackupManager>> {
        self.backup_manager.as_ref()
    }

    fn context(&self) -> CheckContext<'_> {
        CheckContext {
            project_root: &self.project_root,
            settings: &self.settings,
            probe: self.probe.as_ref(),
            backup: self.backup_manager.as_deref(),
            backups_enabled: self.backups_enabled,
        }
    }

    fn resolve(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|f| {
                if f.is_absolute() {
                    normalize(f)
                } else {
                    normalize(&self.project_root.join(f))
                }
            })
            .collect()
    }

    /// Checks run before any file is touched.
    pub fn validate_pre_operation(&self, files: &[PathBuf], operation_type: &str) -> ValidationReport {
        let files = self.resolve(files);
        let ctx = self.context();
        let checks = vec![
            checks::memory_check(&ctx),
            checks::cpu_check(&ctx),
            checks::fs_permissions(&ctx),
            checks::disk_space(&ctx, &files),
            checks::project_integrity(&ctx),
            checks::git_repository(&ctx),
            checks::build_dependencies(&ctx),
            checks::file_criticality(&ctx, &files),
            checks::file_dependencies(&files),
            checks::backup_capability(&ctx),
        ];

        let report = ValidationReport::from_checks(operation_type, checks);
        log_report(&report);
        report
    }

    /// Checks run after removal. The report's operation type is `post_<operation_type>`.
    pub fn validate_post_operation(&self, files: &[PathBuf], operation_type: &str) -> ValidationReport {
        let files = self.resolve(files);
        let ctx = self.context();
        let checks = vec![
            checks::project_integrity(&ctx),
            checks::import_verification(&ctx, &files),
            checks::build_verification(&ctx, &files),
            checks::broken_references(&files),
        ];

        let report = ValidationReport::from_checks(format!("post_{}", operation_type), checks);
        log_report(&report);
        report
    }

    pub fn create_rollback_plan(&self, backup: &BackupMetadata, report: &ValidationReport) -> RollbackPlan {
        let plan = RollbackPlan::derive(backup, report);
        debug!(
            backup_id = %plan.backup_id,
            required = plan.rollback_required,
            automatic = plan.automatic_rollback,
            "Rollback plan created"
        );
        plan
    }

    /// Restore a snapshot over the project and re-validate.
    pub fn execute_rollback(
        &self,
        backup_id: &str,
        plan: &RollbackPlan,
        abort: Option<&dyn StopSignal>,
    ) -> RollbackOutcome {
        let started = Instant::now();
        let mut outcome = RollbackOutcome::new(backup_id);
        if plan.backup_id != backup_id {
            warn!(
                "Rollback plan targets {} but {} was requested",
                plan.backup_id, backup_id
            );
        }

        self.run_rollback(backup_id, abort, &mut outcome);

        outcome.duration = started.elapsed();
        if outcome.success {
            info!(
                "Rollback from {} restored {} files in {:?}",
                backup_id, outcome.restored_files, outcome.duration
            );
        } else {
            error!(
                "Rollback from {} failed: {}",
                backup_id,
                outcome.errors.join("; ")
            );
        }
        outcome
    }

    fn run_rollback(&self, backup_id: &str, abort: Option<&dyn StopSignal>, outcome: &mut RollbackOutcome) {
        let stop_requested = || abort.is_some_and(|signal| signal.is_stop_requested());

        if stop_requested() {
            outcome.aborted = true;
            outcome.errors.push("Rollback aborted before restore".to_string());
            return;
        }
        let Some(manager) = self.backup_manager.as_deref() else {
            outcome.errors.push("No backup manager available".to_string());
            return;
        };
        let Some(metadata) = manager.get_backup_info(backup_id) else {
            outcome.errors.push(format!("Backup {} not found", backup_id));
            return;
        };
        if metadata.total_files == 0 && metadata.entries.is_empty() {
            outcome.errors.push(format!("Backup {} holds no files", backup_id));
            return;
        }
        if !manager.verify_backup_integrity(backup_id) {
            outcome
                .errors
                .push(format!("Backup {} failed integrity verification", backup_id));
            return;
        }

        let restored_paths = match manager.restore_backup(backup_id, None, false, true) {
            Ok(summary) => {
                outcome.restored_files = summary.restored.len();
                outcome.failed_files = summary.failed.len();
                outcome.errors.extend(
                    summary
                        .failed
                        .iter()
                        .map(|f| format!("Failed to restore {}: {}", f.path, f.error)),
                );
                summary
                    .restored
                    .iter()
                    .map(|relative| self.project_root.join(relative))
                    .collect::<Vec<_>>()
            }
            Err(e) => {
                outcome.errors.push(format!("Restore failed: {}", e));
                return;
            }
        };

        if stop_requested() {
            outcome.aborted = true;
            outcome
                .errors
                .push("Rollback aborted before re-validation".to_string());
            return;
        }

        let report = self.validate_post_operation(&restored_paths, "rollback");
        outcome.validation_result = Some(report.overall_result);
        outcome.validation_level = Some(report.overall_safety_level);
        if !report.can_proceed() {
            outcome
                .errors
                .extend(report.required_actions.iter().cloned());
        }
        outcome.success = report.can_proceed() && outcome.failed_files == 0;
    }
}

fn log_report(report: &ValidationReport) {
    info!(
        operation = %report.operation_type,
        result = %report.overall_result,
        level = %report.overall_safety_level,
        passed = report.passed_checks,
        warnings = report.warning_checks,
        failed = report.failed_checks,
        errors = report.error_checks,
        "Validation finished"
    );
    for check in &report.checks {
        match check.result {
            CheckResult::Pass => debug!("{}: {}", check.name, check.message),
            CheckResult::Warning => warn!("{}: {}", check.name, check.message),
            CheckResult::Fail | CheckResult::Error => error!("{}: {}", check.name, check.message),
        }
    }
}
