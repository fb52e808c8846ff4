//! Phase gates for a cleanup run.

use crate::validation::{CheckResult, SafetyLevel, ValidationReport};

/// Inputs to the proceed gate besides the report
#[derive(Debug, Clone, Copy)]
pub struct ProceedPolicy {
    pub strict_mode: bool,
    pub dry_run: bool,
    pub require_confirmation: bool,
    pub user_confirmation: bool,
}

/// `Err` carries the abort reason.
pub fn check_proceed(report: &ValidationReport, policy: ProceedPolicy) -> Result<(), String> {
    if report.overall_result == CheckResult::Error {
        return Err("Pre-validation reported errors".to_string());
    }
    if report.overall_safety_level == SafetyLevel::Critical && policy.strict_mode {
        return Err("Critical safety level in strict mode".to_string());
    }
    if report.overall_safety_level == SafetyLevel::Dangerous
        && !policy.dry_run
        && policy.require_confirmation
        && !policy.user_confirmation
    {
        return Err("Dangerous operation requires user confirmation".to_string());
    }
    if report.overall_result == CheckResult::Fail && !policy.dry_run {
        return Err("Pre-validation failed".to_string());
    }
    Ok(())
}

pub fn should_backup(
    report: &ValidationReport,
    force_backup: bool,
    dry_run: bool,
    backups_enabled: bool,
) -> bool {
    if force_backup {
        return true;
    }
    if dry_run || !backups_enabled {
        return false;
    }
    report.overall_safety_level >= SafetyLevel::Dangerous
        || matches!(
            report.overall_result,
            CheckResult::Fail | CheckResult::Warning
        )
}

pub fn should_rollback(post: &ValidationReport, strict_mode: bool) -> bool {
    post.overall_result == CheckResult::Error
        || (post.overall_result == CheckResult::Fail && strict_mode)
        || post.overall_safety_level == SafetyLevel::Critical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{CheckKind, SafetyCheck};

    fn report(result: CheckResult) -> ValidationReport {
        ValidationReport::from_checks(
            "cleanup",
            vec![SafetyCheck::new(CheckKind::DiskSpace, result, "x")],
        )
    }

    fn policy(strict_mode: bool, dry_run: bool, user_confirmation: bool) -> ProceedPolicy {
        ProceedPolicy {
            strict_mode,
            dry_run,
            require_confirmation: true,
            user_confirmation,
        }
    }

    #[test]
    fn test_errors_always_block() {
        let r = report(CheckResult::Error);
        assert_eq!(r.overall_safety_level, SafetyLevel::Critical);
        assert!(check_proceed(&r, policy(false, true, true)).is_err());
    }

    #[test]
    fn test_check_level_alone_does_not_block() {
        let r = ValidationReport::from_checks(
            "cleanup",
            vec![SafetyCheck::warning(CheckKind::FileCriticality, "sources targeted")
                .with_level(SafetyLevel::Critical)],
        );
        assert!(check_proceed(&r, policy(true, false, false)).is_ok());
    }

    #[test]
    fn test_dangerous_needs_confirmation_when_live() {
        let r = report(CheckResult::Fail);
        assert_eq!(
            check_proceed(&r, policy(true, false, false)).unwrap_err(),
            "Dangerous operation requires user confirmation"
        );
        assert_eq!(
            check_proceed(&r, policy(true, false, true)).unwrap_err(),
            "Pre-validation failed"
        );
        assert!(check_proceed(&r, policy(true, true, false)).is_ok());

        let relaxed = ProceedPolicy {
            require_confirmation: false,
            ..policy(true, false, false)
        };
        assert_eq!(check_proceed(&r, relaxed).unwrap_err(), "Pre-validation failed");
    }

    #[test]
    fn test_warnings_proceed() {
        let r = report(CheckResult::Warning);
        assert!(check_proceed(&r, policy(true, false, false)).is_ok());
        assert!(check_proceed(&r, policy(false, true, false)).is_ok());
    }

    #[test]
    fn test_backup_decision() {
        let clean = report(CheckResult::Pass);
        let warned = report(CheckResult::Warning);
        let failed = report(CheckResult::Fail);

        assert!(should_backup(&clean, true, true, false));
        assert!(!should_backup(&clean, false, false, true));
        assert!(should_backup(&warned, false, false, true));
        assert!(should_backup(&failed, false, false, true));
        assert!(!should_backup(&warned, false, true, true));
        assert!(!should_backup(&warned, false, false, false));
    }

    #[test]
    fn test_rollback_decision() {
        assert!(should_rollback(&report(CheckResult::Error), false));
        assert!(should_rollback(&report(CheckResult::Fail), true));
        assert!(!should_rollback(&report(CheckResult::Fail), false));
        assert!(!should_rollback(&report(CheckResult::Warning), true));
        assert!(!should_rollback(&report(CheckResult::Pass), true));
    }

    #[test]
    fn test_failed_critical_check_rolls_back_only_in_strict_mode() {
        let post = ValidationReport::from_checks(
            "post_cleanup",
            vec![
                SafetyCheck::fail(CheckKind::ProjectIntegrity, "markers gone"),
                SafetyCheck::pass(CheckKind::BrokenReferences, "ok"),
            ],
        );
        assert!(!should_rollback(&post, false));
        assert!(should_rollback(&post, true));
    }
}
