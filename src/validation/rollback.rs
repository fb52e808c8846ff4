//! Rollback planning and outcome types.

use super::types::{CheckResult, SafetyLevel, ValidationReport};
use crate::backup::BackupMetadata;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cooperative abort source consulted during a rollback.
pub trait StopSignal {
    fn is_stop_requested(&self) -> bool;
}

impl<F: Fn() -> bool> StopSignal for F {
    fn is_stop_requested(&self) -> bool {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How to undo an operation from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub backup_id: String,
    pub rollback_required: bool,
    pub automatic_rollback: bool,
    pub rollback_steps: Vec<String>,
    pub verification_steps: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub recovery_time_estimate: Duration,
    pub risk_assessment: RiskLevel,
}

impl RollbackPlan {
    pub fn derive(backup: &BackupMetadata, report: &ValidationReport) -> Self {
        let rollback_required = matches!(
            report.overall_result,
            CheckResult::Fail | CheckResult::Error
        );
        let critical = report.overall_safety_level == SafetyLevel::Critical;

        let rollback_steps = if report.has_failures() {
            vec![
                format!("Verify integrity of backup {}", backup.backup_id),
                format!(
                    "Restore {} files from backup {}",
                    backup.total_files, backup.backup_id
                ),
                "Re-run post-rollback validation".to_string(),
            ]
        } else {
            Vec::new()
        };
        let verification_steps = report
            .checks
            .iter()
            .filter(|c| matches!(c.result, CheckResult::Fail | CheckResult::Error))
            .map(|c| format!("Re-check {}: {}", c.name, c.message))
            .collect();

        // Roughly 100ms per file, never under a second.
        let estimate_ms = (backup.total_files as u64).saturating_mul(100).max(1000);

        let risk_assessment = match report.overall_safety_level {
            SafetyLevel::Critical => RiskLevel::High,
            SafetyLevel::Dangerous => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };

        Self {
            backup_id: backup.backup_id.clone(),
            rollback_required,
            automatic_rollback: critical,
            rollback_steps,
            verification_steps,
            recovery_time_estimate: Duration::from_millis(estimate_ms),
            risk_assessment,
        }
    }
}

/// What a rollback attempt achieved. Failures are recorded, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub backup_id: String,
    pub success: bool,
    pub restored_files: usize,
    pub failed_files: usize,
    pub errors: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub aborted: bool,
    /// The snapshot was a dry-run descriptor, nothing was restored.
    pub simulated: bool,
    pub validation_result: Option<CheckResult>,
    pub validation_level: Option<SafetyLevel>,
}

impl RollbackOutcome {
    pub(crate) fn new(backup_id: &str) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            success: false,
            restored_files: 0,
            failed_files: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            aborted: false,
            simulated: false,
            validation_result: None,
            validation_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupMethod;
    use crate::validation::types::{CheckKind, SafetyCheck};
    use chrono::Utc;
    use std::path::PathBuf;

    fn metadata(files: usize) -> BackupMetadata {
        BackupMetadata {
            backup_id: "cleanup_20240101_000000_000000".to_string(),
            timestamp: Utc::now(),
            operation_type: "cleanup".to_string(),
            total_files: files,
            total_size_bytes: 0,
            compressed_size_bytes: 0,
            checksum: String::new(),
            backup_method: BackupMethod::Copy,
            compression_ratio: 1.0,
            integrity_verified: true,
            project_root: PathBuf::from("/tmp/project"),
            files: Vec::new(),
            entries: Vec::new(),
        }
    }

    #[test]
    fn test_plan_for_clean_report() {
        let report = ValidationReport::from_checks(
            "post_cleanup",
            vec![SafetyCheck::pass(CheckKind::ProjectIntegrity, "ok")],
        );
        let plan = RollbackPlan::derive(&metadata(3), &report);
        assert!(!plan.rollback_required);
        assert!(!plan.automatic_rollback);
        assert!(plan.rollback_steps.is_empty());
        assert!(plan.verification_steps.is_empty());
        assert_eq!(plan.risk_assessment, RiskLevel::Low);
        assert_eq!(plan.recovery_time_estimate, Duration::from_secs(1));
    }

    #[test]
    fn test_plan_for_failed_check() {
        let report = ValidationReport::from_checks(
            "post_cleanup",
            vec![
                SafetyCheck::fail(CheckKind::ProjectIntegrity, "markers gone"),
                SafetyCheck::pass(CheckKind::BrokenReferences, "ok"),
            ],
        );
        let plan = RollbackPlan::derive(&metadata(50), &report);
        assert!(plan.rollback_required);
        assert!(!plan.automatic_rollback);
        assert_eq!(plan.risk_assessment, RiskLevel::Medium);
        assert_eq!(plan.rollback_steps.len(), 3);
        assert_eq!(
            plan.verification_steps,
            vec!["Re-check project_integrity: markers gone".to_string()]
        );
        assert_eq!(plan.recovery_time_estimate, Duration::from_secs(5));
    }

    #[test]
    fn test_plan_for_errored_check_is_automatic() {
        let report = ValidationReport::from_checks(
            "post_cleanup",
            vec![SafetyCheck::error(CheckKind::BuildVerification, "unreadable")],
        );
        let plan = RollbackPlan::derive(&metadata(1), &report);
        assert!(plan.automatic_rollback);
        assert_eq!(plan.risk_assessment, RiskLevel::High);
        assert!(plan.rollback_steps[1].contains("Restore 1 files"));
    }

    #[test]
    fn test_closure_stop_signal() {
        let stop = || true;
        assert!(stop.is_stop_requested());
    }
}
